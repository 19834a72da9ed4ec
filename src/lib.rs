use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

pub mod charset;
mod error;
mod flat;
mod game;
pub mod grammar;
mod node;
pub mod properties;
#[cfg(feature = "python")]
mod python_bindings;
pub mod text_parsing;

pub use charset::{BuiltinCharsets, CharsetCodec};
pub use error::{Result, SgfError};
pub use flat::{parse_game_to_flat, FlatBuffers};
pub use game::{MainSequenceIter, ParseConfig, SgfGame};
pub use grammar::{CoarseGameTree, PropertyMap, DEFAULT_WRAP};
pub use node::{Node, NodeId, NodeMut, NodeProperties};
pub use properties::{Colour, Point, Presenter, PropertyType, PropertyValue};

/// Parses the first game tree in `data`.
pub fn parse_sgf(data: &[u8], config: &ParseConfig) -> Result<SgfGame> {
    SgfGame::from_bytes(data, config)
}

/// Parses every game tree in `data`.
///
/// Fails if there are none, or with the index of the first game that fails.
pub fn parse_sgf_collection(data: &[u8], config: &ParseConfig) -> Result<Vec<SgfGame>> {
    grammar::parse_sgf_collection(data)?
        .into_iter()
        .enumerate()
        .map(|(index, coarse_game)| {
            SgfGame::from_coarse_game_tree(coarse_game, config).map_err(|e| e.in_game(index))
        })
        .collect()
}

fn build_thread_pool(num_threads: Option<usize>) -> Result<rayon::ThreadPool> {
    let num_threads = num_threads.unwrap_or_else(num_cpus::get);
    ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(|e| SgfError::ThreadPool(e.to_string()))
}

/// In parallel, parse a set of independent SGF documents (first game of each).
///
/// The first failure aborts the batch and reports the document's index.
pub fn parse_sgf_games<S>(sgfs: &[S], num_threads: Option<usize>, config: &ParseConfig) -> Result<Vec<SgfGame>>
where
    S: AsRef<[u8]> + Sync,
{
    let thread_pool = build_thread_pool(num_threads)?;
    thread_pool.install(|| {
        sgfs.par_iter()
            .enumerate()
            .map(|(index, sgf)| parse_sgf(sgf.as_ref(), config).map_err(|e| e.in_game(index)))
            .collect()
    })
}

/// In parallel, extract the main lines of many documents into flat buffers.
///
/// Documents that fail to parse are recorded as invalid games.
pub fn parse_games_flat<S>(sgfs: &[S], num_threads: Option<usize>) -> Result<FlatBuffers>
where
    S: AsRef<[u8]> + Sync,
{
    let num_threads = num_threads.unwrap_or_else(num_cpus::get).max(1);
    let thread_pool = build_thread_pool(Some(num_threads))?;
    let games_per_thread = sgfs.len().div_ceil(num_threads);
    let moves_per_game = 200; // Estimate ~200 moves per 19x19 game

    let thread_results: Vec<FlatBuffers> = thread_pool.install(|| {
        sgfs.par_iter()
            .fold_with(
                FlatBuffers::with_capacity(games_per_thread, moves_per_game),
                |mut buffers, sgf| {
                    // Failures are recorded in the buffers themselves.
                    let _ = parse_game_to_flat(sgf.as_ref(), &mut buffers);
                    buffers
                },
            )
            .collect()
    });
    tracing::debug!(
        games = sgfs.len(),
        chunks = thread_results.len(),
        "parsed games into flat buffers"
    );
    Ok(FlatBuffers::merge_all(thread_results))
}

#[cfg(feature = "python")]
#[pyo3::pymodule]
fn rust_sgf_reader(m: &pyo3::Bound<'_, pyo3::types::PyModule>) -> pyo3::PyResult<()> {
    python_bindings::register(m)
}
