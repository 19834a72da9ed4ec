//! Flat buffers of main-line moves for bulk extraction.
//!
//! Many games are parsed into one struct-of-arrays layout instead of one
//! `SgfGame` each. Only the main line is recorded, and no variation is ever
//! expanded. Used by `parse_games_flat`.

use crate::error::{Result, SgfError};
use crate::game::{ParseConfig, SgfGame};
use crate::node::NodeProperties;
use crate::properties::Colour;
use tracing::trace;

/// Accumulated flat buffers for multiple parsed games.
///
/// Laid out for thread-local accumulation during parallel parsing, cheap
/// merging with `extend`, and direct conversion to NumPy arrays.
#[derive(Debug, Default, Clone)]
pub struct FlatBuffers {
    // Move arrays (one entry per move)
    pub colours: Vec<bool>, // true=black
    pub rows: Vec<i8>,      // -1 for a pass
    pub cols: Vec<i8>,      // -1 for a pass

    // Per-game data
    pub move_counts: Vec<u32>,
    pub board_sizes: Vec<u8>,
    pub komis: Vec<f32>,
    pub handicaps: Vec<u8>, // 0 for no handicap
    pub winners: Vec<Option<char>>,
    pub valid: Vec<bool>,
    pub parse_errors: Vec<Option<String>>,
}

impl FlatBuffers {
    /// Create a new FlatBuffers with pre-allocated capacity.
    pub fn with_capacity(estimated_games: usize, moves_per_game: usize) -> Self {
        let estimated_moves = estimated_games * moves_per_game;
        FlatBuffers {
            colours: Vec::with_capacity(estimated_moves),
            rows: Vec::with_capacity(estimated_moves),
            cols: Vec::with_capacity(estimated_moves),

            move_counts: Vec::with_capacity(estimated_games),
            board_sizes: Vec::with_capacity(estimated_games),
            komis: Vec::with_capacity(estimated_games),
            handicaps: Vec::with_capacity(estimated_games),
            winners: Vec::with_capacity(estimated_games),
            valid: Vec::with_capacity(estimated_games),
            parse_errors: Vec::with_capacity(estimated_games),
        }
    }

    /// Number of games in this buffer.
    pub fn num_games(&self) -> usize {
        self.move_counts.len()
    }

    /// Total number of moves across all games.
    pub fn total_moves(&self) -> usize {
        self.colours.len()
    }

    /// Compute CSR-style offsets from counts.
    pub fn compute_move_offsets(&self) -> Vec<u32> {
        let mut offsets = Vec::with_capacity(self.move_counts.len() + 1);
        let mut total = 0;
        offsets.push(total);
        for &count in &self.move_counts {
            total += count;
            offsets.push(total);
        }
        offsets
    }

    /// Concatenate thread-local buffers in order.
    pub fn merge_all(buffers: Vec<FlatBuffers>) -> FlatBuffers {
        let n_games = buffers.iter().map(FlatBuffers::num_games).sum();
        let n_moves = buffers.iter().map(FlatBuffers::total_moves).sum::<usize>();
        let mut merged = FlatBuffers::with_capacity(n_games, 0);
        merged.colours.reserve(n_moves);
        merged.rows.reserve(n_moves);
        merged.cols.reserve(n_moves);
        for buffer in buffers {
            merged.colours.extend(buffer.colours);
            merged.rows.extend(buffer.rows);
            merged.cols.extend(buffer.cols);

            merged.move_counts.extend(buffer.move_counts);
            merged.board_sizes.extend(buffer.board_sizes);
            merged.komis.extend(buffer.komis);
            merged.handicaps.extend(buffer.handicaps);
            merged.winners.extend(buffer.winners);
            merged.valid.extend(buffer.valid);
            merged.parse_errors.extend(buffer.parse_errors);
        }
        merged
    }

    /// Record a game that could not be parsed at all.
    fn push_failed_game(&mut self, error: &SgfError) {
        self.move_counts.push(0);
        self.board_sizes.push(0);
        self.komis.push(f32::NAN);
        self.handicaps.push(0);
        self.winners.push(None);
        self.valid.push(false);
        self.parse_errors.push(Some(error.to_string()));
    }
}

/// Appends the main line of one game. Returns whether every move decoded.
///
/// Grammar failures are recorded as a game with no moves and
/// `valid == false` rather than aborting the batch.
pub fn parse_game_to_flat(sgf: &[u8], buffers: &mut FlatBuffers) -> Result<bool> {
    let game = match SgfGame::from_bytes(sgf, &ParseConfig::default()) {
        Ok(game) => game,
        Err(e) => {
            buffers.push_failed_game(&e);
            return Err(e);
        }
    };

    let mut errors: Vec<SgfError> = Vec::new();
    let mut move_count = 0;
    for node in game.main_sequence_iter() {
        let (colour, point) = match node.get_move() {
            Ok(Some(mv)) => mv,
            Ok(None) => continue,
            Err(e) => {
                trace!(error = %e, "skipping undecodable move");
                errors.push(e);
                continue;
            }
        };
        let (row, col) = point.map_or((-1, -1), |(row, col)| (row as i8, col as i8));
        buffers.colours.push(colour == Colour::Black);
        buffers.rows.push(row);
        buffers.cols.push(col);
        move_count += 1;
    }

    let komi = game.komi().unwrap_or_else(|e| {
        errors.push(e);
        f64::NAN
    });
    let handicap = game
        .handicap()
        .and_then(|handicap| match handicap {
            None => Ok(0),
            Some(n) => u8::try_from(n)
                .map_err(|_| SgfError::value(format!("handicap out of range: {}", n))),
        })
        .unwrap_or_else(|e| {
            errors.push(e);
            0
        });
    let winner = game.winner().unwrap_or_else(|e| {
        errors.push(e);
        None
    });

    let valid = errors.is_empty();
    buffers.move_counts.push(move_count);
    buffers.board_sizes.push(game.size() as u8);
    buffers.komis.push(komi as f32);
    buffers.handicaps.push(handicap);
    buffers.winners.push(winner.map(Colour::letter));
    buffers.valid.push(valid);
    buffers
        .parse_errors
        .push(errors.first().map(SgfError::to_string));
    Ok(valid)
}
