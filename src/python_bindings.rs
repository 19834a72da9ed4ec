use crate::{
    parse_games_flat as parse_games_flat_native, parse_sgf_games as parse_sgf_games_native,
    Colour, FlatBuffers, NodeProperties, ParseConfig, SgfError, SgfGame, DEFAULT_WRAP,
};
use numpy::PyArray1;
use pyo3::exceptions::{PyKeyError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyBytes;
use std::collections::HashMap;

impl From<SgfError> for PyErr {
    fn from(err: SgfError) -> PyErr {
        match err {
            SgfError::MissingProperty(_) => PyKeyError::new_err(err.to_string()),
            SgfError::ThreadPool(_) => PyRuntimeError::new_err(err.to_string()),
            _ => PyValueError::new_err(err.to_string()),
        }
    }
}

fn parse_colour(colour: &str) -> PyResult<Colour> {
    colour
        .chars()
        .next()
        .filter(|_| colour.len() == 1)
        .and_then(Colour::from_letter)
        .ok_or_else(|| PyValueError::new_err(format!("bad colour: {:?}", colour)))
}

fn config_for(override_encoding: Option<String>) -> ParseConfig {
    ParseConfig {
        override_encoding,
        ..ParseConfig::default()
    }
}

/// One parsed SGF game.
#[pyclass(name = "SgfGame")]
pub struct PySgfGame {
    inner: SgfGame,
}

#[pymethods]
impl PySgfGame {
    #[new]
    #[pyo3(signature = (size = 19, encoding = "UTF-8"))]
    fn new(size: usize, encoding: &str) -> PyResult<Self> {
        Ok(PySgfGame {
            inner: SgfGame::with_encoding(size, encoding)?,
        })
    }

    /// Parses the first game tree in `data`.
    #[staticmethod]
    #[pyo3(signature = (data, override_encoding = None))]
    fn from_bytes(data: &[u8], override_encoding: Option<String>) -> PyResult<Self> {
        Ok(PySgfGame {
            inner: SgfGame::from_bytes(data, &config_for(override_encoding))?,
        })
    }

    #[pyo3(signature = (wrap = DEFAULT_WRAP))]
    fn serialise<'py>(&self, py: Python<'py>, wrap: usize) -> PyResult<Bound<'py, PyBytes>> {
        let serialised = self.inner.serialise(wrap)?;
        Ok(PyBytes::new(py, &serialised))
    }

    #[getter]
    fn size(&self) -> usize {
        self.inner.size()
    }

    #[getter]
    fn charset(&self) -> PyResult<String> {
        Ok(self.inner.charset()?)
    }

    #[getter]
    fn komi(&self) -> PyResult<f64> {
        Ok(self.inner.komi()?)
    }

    #[getter]
    fn handicap(&self) -> PyResult<Option<i64>> {
        Ok(self.inner.handicap()?)
    }

    /// "b", "w" or None.
    #[getter]
    fn winner(&self) -> PyResult<Option<char>> {
        Ok(self.inner.winner()?.map(Colour::letter))
    }

    fn player_name(&self, colour: &str) -> PyResult<Option<String>> {
        Ok(self.inner.player_name(parse_colour(colour)?)?)
    }

    /// Raw values of the root's properties.
    #[getter]
    fn root_properties<'py>(&self, py: Python<'py>) -> HashMap<String, Vec<Bound<'py, PyBytes>>> {
        let root = self.inner.root_node();
        root.property_map()
            .iter()
            .map(|(identifier, values)| {
                let values = values.iter().map(|value| PyBytes::new(py, value)).collect();
                (identifier.clone(), values)
            })
            .collect()
    }

    /// Moves of the main line as (colour, (row, col) or None for a pass).
    fn main_line_moves(&self) -> PyResult<Vec<(char, Option<(usize, usize)>)>> {
        let mut moves = Vec::new();
        for node in self.inner.main_sequence_iter() {
            if let Some((colour, point)) = node.get_move()? {
                moves.push((colour.letter(), point));
            }
        }
        Ok(moves)
    }

    fn __repr__(&self) -> String {
        format!("<SgfGame: size {}>", self.inner.size())
    }
}

/// Main-line moves of many games in struct-of-arrays form.
///
/// Moves of game `i` are `colours[move_offsets[i]:move_offsets[i + 1]]`
/// (likewise `rows` and `cols`; -1 marks a pass).
#[pyclass]
pub struct ParsedGames {
    #[pyo3(get)]
    pub colours: Py<PyAny>, // (N_moves,) bool, true=black
    #[pyo3(get)]
    pub rows: Py<PyAny>, // (N_moves,) i8
    #[pyo3(get)]
    pub cols: Py<PyAny>, // (N_moves,) i8
    #[pyo3(get)]
    pub move_offsets: Py<PyAny>, // (N_games + 1,) u32
    #[pyo3(get)]
    pub board_sizes: Py<PyAny>, // (N_games,) u8
    #[pyo3(get)]
    pub komis: Py<PyAny>, // (N_games,) f32
    #[pyo3(get)]
    pub handicaps: Py<PyAny>, // (N_games,) u8
    #[pyo3(get)]
    pub valid: Py<PyAny>, // (N_games,) bool
    #[pyo3(get)]
    pub winners: Vec<Option<char>>,
    #[pyo3(get)]
    pub parse_errors: Vec<Option<String>>,

    pub num_games: usize,
    pub num_moves: usize,
}

impl ParsedGames {
    fn from_buffers(py: Python<'_>, buffers: FlatBuffers) -> Self {
        let move_offsets = buffers.compute_move_offsets();
        let num_games = buffers.num_games();
        let num_moves = buffers.total_moves();
        ParsedGames {
            colours: PyArray1::from_vec(py, buffers.colours).unbind().into_any(),
            rows: PyArray1::from_vec(py, buffers.rows).unbind().into_any(),
            cols: PyArray1::from_vec(py, buffers.cols).unbind().into_any(),
            move_offsets: PyArray1::from_vec(py, move_offsets).unbind().into_any(),
            board_sizes: PyArray1::from_vec(py, buffers.board_sizes).unbind().into_any(),
            komis: PyArray1::from_vec(py, buffers.komis).unbind().into_any(),
            handicaps: PyArray1::from_vec(py, buffers.handicaps).unbind().into_any(),
            valid: PyArray1::from_vec(py, buffers.valid).unbind().into_any(),
            winners: buffers.winners,
            parse_errors: buffers.parse_errors,
            num_games,
            num_moves,
        }
    }
}

#[pymethods]
impl ParsedGames {
    /// Number of games in the result.
    #[getter]
    fn num_games(&self) -> usize {
        self.num_games
    }

    /// Total number of moves across all games.
    #[getter]
    fn num_moves(&self) -> usize {
        self.num_moves
    }

    fn __len__(&self) -> usize {
        self.num_games
    }

    fn __repr__(&self) -> String {
        format!(
            "<ParsedGames: {} games, {} moves>",
            self.num_games, self.num_moves
        )
    }
}

/// In parallel, parse a set of SGF documents.
#[pyfunction]
#[pyo3(signature = (sgfs, num_threads = None, override_encoding = None))]
fn parse_sgf_games(
    py: Python<'_>,
    sgfs: Vec<Vec<u8>>,
    num_threads: Option<usize>,
    override_encoding: Option<String>,
) -> PyResult<Vec<PySgfGame>> {
    let config = config_for(override_encoding);
    let games = py.allow_threads(|| parse_sgf_games_native(&sgfs, num_threads, &config))?;
    Ok(games
        .into_iter()
        .map(|inner| PySgfGame { inner })
        .collect())
}

/// In parallel, extract the main lines of many SGF documents into NumPy arrays.
#[pyfunction]
#[pyo3(signature = (sgfs, num_threads = None))]
fn parse_games_flat(
    py: Python<'_>,
    sgfs: Vec<Vec<u8>>,
    num_threads: Option<usize>,
) -> PyResult<ParsedGames> {
    let buffers = py.allow_threads(|| parse_games_flat_native(&sgfs, num_threads))?;
    Ok(ParsedGames::from_buffers(py, buffers))
}

pub fn register(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(parse_sgf_games, m)?)?;
    m.add_function(wrap_pyfunction!(parse_games_flat, m)?)?;
    m.add_class::<PySgfGame>()?;
    m.add_class::<ParsedGames>()?;
    Ok(())
}
