//! Benchmarks for the SGF parsing APIs.
//!
//! Covers a single game (parse, lazy main-line walk, full expansion and
//! serialisation) and the batch APIs over a synthetic corpus.

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use rust_sgf_reader::{
    parse_games_flat, parse_sgf, parse_sgf_games, NodeProperties, ParseConfig, DEFAULT_WRAP,
};

/// A 19x19 game of `moves` moves with a short variation every 25 moves.
fn synthetic_game(moves: usize) -> Vec<u8> {
    let mut sgf = String::from("(;FF[4]GM[1]SZ[19]CA[UTF-8]KM[6.5]PB[Black]PW[White]RE[B+R]");
    let mut open = 0;
    for i in 0..moves {
        let colour = if i % 2 == 0 { 'B' } else { 'W' };
        let col = (b'a' + (i * 7 % 19) as u8) as char;
        let row = (b'a' + (i * 11 % 19) as u8) as char;
        if i % 25 == 24 {
            // A pass variation, then the rest of the game as a second variation.
            sgf.push_str(&format!("(;{}[tt]C[pass])(", colour));
            open += 1;
        }
        sgf.push_str(&format!(";{}[{}{}]", colour, col, row));
    }
    for _ in 0..open {
        sgf.push(')');
    }
    sgf.push(')');
    sgf.into_bytes()
}

fn bench_single_game(c: &mut Criterion) {
    let data = synthetic_game(250);
    let config = ParseConfig::default();

    c.bench_function("parse", |b| {
        b.iter(|| parse_sgf(black_box(&data), &config).unwrap())
    });

    c.bench_function("parse + lazy main line", |b| {
        b.iter(|| {
            let game = parse_sgf(black_box(&data), &config).unwrap();
            game.main_sequence_iter()
                .filter_map(|node| node.get_move().unwrap())
                .count()
        })
    });

    c.bench_function("parse + serialise", |b| {
        b.iter(|| {
            let game = parse_sgf(black_box(&data), &config).unwrap();
            game.serialise(DEFAULT_WRAP).unwrap()
        })
    });
}

fn bench_batch(c: &mut Criterion) {
    let corpus: Vec<Vec<u8>> = (0..2_000).map(|i| synthetic_game(100 + i % 200)).collect();
    let config = ParseConfig::default();

    c.bench_function("parse_sgf_games", |b| {
        b.iter(|| parse_sgf_games(black_box(&corpus), None, &config).unwrap())
    });

    c.bench_function("parse_games_flat", |b| {
        b.iter(|| parse_games_flat(black_box(&corpus), None).unwrap())
    });
}

criterion_group!(benches, bench_single_game, bench_batch);
criterion_main!(benches);
