//! Typed property values and the per-game property presenter.
//!
//! Every SGF property has a value type (number, point list, text, ...). A
//! [`PropertyType`] pairs an interpreter, turning raw values into a
//! [`PropertyValue`], with the serialiser that turns it back. The
//! [`Presenter`] maps identifiers to property types for one game; it knows
//! the board size and working encoding that the point and text codecs need.

use crate::charset::{BuiltinCharsets, CharsetCodec, UTF_8};
use crate::error::{Result, SgfError};
use crate::text_parsing::{compose, escape_text, parse_compose, simpletext_value, text_value};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Board coordinates as (row, col); row 0 is the bottom row, col 0 the left column.
pub type Point = (usize, usize);

pub const MAX_BOARD_SIZE: usize = 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Colour {
    Black,
    White,
}

impl Colour {
    /// Lower-case letter: 'b' or 'w'.
    pub fn letter(self) -> char {
        match self {
            Colour::Black => 'b',
            Colour::White => 'w',
        }
    }

    /// The move property for this colour.
    pub fn move_identifier(self) -> &'static str {
        match self {
            Colour::Black => "B",
            Colour::White => "W",
        }
    }

    pub fn from_letter(c: char) -> Option<Colour> {
        match c.to_ascii_lowercase() {
            'b' => Some(Colour::Black),
            'w' => Some(Colour::White),
            _ => None,
        }
    }
}

/// An interpreted property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Presence-only properties (`none` type) interpret as `Bool(true)`.
    Bool(bool),
    Number(i64),
    Real(f64),
    /// Emphasis: 1 (normal) or 2 (emphasized).
    Double(u8),
    Colour(Colour),
    /// SimpleText and Text, decoded to UTF-8.
    Text(String),
    Point(Point),
    /// `None` is a pass.
    Move(Option<Point>),
    PointList(BTreeSet<Point>),
    /// `AP`: application name and version.
    Application(String, String),
    /// `AR` and `LN`: pairs of points.
    PointPairs(Vec<(Point, Point)>),
    /// `FG`: `None` for the plain form, else flags and diagram name.
    Figure(Option<(i64, String)>),
    /// `LB`: labelled points.
    Labels(Vec<(Point, String)>),
}

impl PropertyValue {
    pub fn as_number(&self) -> Option<i64> {
        match self {
            PropertyValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            PropertyValue::Real(f) => Some(*f),
            PropertyValue::Number(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_colour(&self) -> Option<Colour> {
        match self {
            PropertyValue::Colour(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_point_list(&self) -> Option<&BTreeSet<Point>> {
        match self {
            PropertyValue::PointList(points) => Some(points),
            _ => None,
        }
    }

    /// `Some(None)` for a pass.
    pub fn as_move(&self) -> Option<Option<Point>> {
        match self {
            PropertyValue::Move(mv) => Some(*mv),
            _ => None,
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(n: i64) -> Self {
        PropertyValue::Number(n)
    }
}

impl From<f64> for PropertyValue {
    fn from(f: f64) -> Self {
        PropertyValue::Real(f)
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::Text(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::Text(s)
    }
}

impl From<Colour> for PropertyValue {
    fn from(c: Colour) -> Self {
        PropertyValue::Colour(c)
    }
}

impl From<BTreeSet<Point>> for PropertyValue {
    fn from(points: BTreeSet<Point>) -> Self {
        PropertyValue::PointList(points)
    }
}

/// What the codecs need to know about the game.
#[derive(Clone)]
pub struct Context {
    size: usize,
    encoding: String,
    charsets: Arc<dyn CharsetCodec>,
}

impl Context {
    pub fn size(&self) -> usize {
        self.size
    }

    /// Canonical name of the working encoding.
    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn charsets(&self) -> &dyn CharsetCodec {
        self.charsets.as_ref()
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        self.charsets.decode(bytes, &self.encoding)
    }

    fn encode(&self, text: &str) -> Result<Vec<u8>> {
        self.charsets.encode(text, &self.encoding)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("size", &self.size)
            .field("encoding", &self.encoding)
            .finish()
    }
}

pub type ScalarInterpreter = fn(&[u8], &Context) -> Result<PropertyValue>;
pub type ScalarSerialiser = fn(&PropertyValue, &Context) -> Result<Vec<u8>>;
pub type ListInterpreter = fn(&[Vec<u8>], &Context) -> Result<PropertyValue>;
pub type ListSerialiser = fn(&PropertyValue, &Context) -> Result<Vec<Vec<u8>>>;

#[derive(Debug, Clone, Copy)]
pub enum Codec {
    /// The property takes exactly one raw value.
    Scalar {
        interpret: ScalarInterpreter,
        serialise: ScalarSerialiser,
    },
    /// The property takes a list of raw values.
    List {
        interpret: ListInterpreter,
        serialise: ListSerialiser,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct PropertyType {
    name: &'static str,
    codec: Codec,
    allows_empty_list: bool,
}

impl PropertyType {
    pub const NONE: PropertyType = PropertyType::scalar("none", interpret_none, serialise_none);
    pub const NUMBER: PropertyType = PropertyType::scalar("number", interpret_number, serialise_number);
    pub const REAL: PropertyType = PropertyType::scalar("real", interpret_real, serialise_real);
    pub const DOUBLE: PropertyType = PropertyType::scalar("double", interpret_double, serialise_double);
    pub const COLOUR: PropertyType = PropertyType::scalar("colour", interpret_colour, serialise_colour);
    pub const SIMPLETEXT: PropertyType =
        PropertyType::scalar("simpletext", interpret_simpletext, serialise_text);
    pub const TEXT: PropertyType = PropertyType::scalar("text", interpret_text, serialise_text);
    pub const POINT: PropertyType = PropertyType::scalar("point", interpret_point, serialise_point);
    pub const MOVE: PropertyType = PropertyType::scalar("move", interpret_move, serialise_move);
    pub const POINT_LIST: PropertyType =
        PropertyType::list("point_list", interpret_point_list, serialise_point_list, false);
    pub const POINT_ELIST: PropertyType =
        PropertyType::list("point_elist", interpret_point_list, serialise_point_list, true);
    pub const STONE_LIST: PropertyType =
        PropertyType::list("stone_list", interpret_point_list, serialise_point_list, false);
    pub const AP: PropertyType = PropertyType::scalar("AP", interpret_ap, serialise_ap);
    pub const ARLN_LIST: PropertyType =
        PropertyType::list("ARLN_list", interpret_arln_list, serialise_arln_list, false);
    pub const FG: PropertyType = PropertyType::scalar("FG", interpret_fg, serialise_fg);
    pub const LB_LIST: PropertyType =
        PropertyType::list("LB_list", interpret_lb_list, serialise_lb_list, false);

    pub const fn scalar(name: &'static str, interpret: ScalarInterpreter, serialise: ScalarSerialiser) -> Self {
        PropertyType {
            name,
            codec: Codec::Scalar { interpret, serialise },
            allows_empty_list: false,
        }
    }

    pub const fn list(
        name: &'static str,
        interpret: ListInterpreter,
        serialise: ListSerialiser,
        allows_empty_list: bool,
    ) -> Self {
        PropertyType {
            name,
            codec: Codec::List { interpret, serialise },
            allows_empty_list,
        }
    }

    /// Looks up one of the built-in types by its name (`"number"`, `"point_elist"`, `"LB_list"`, ...).
    pub fn by_name(name: &str) -> Option<PropertyType> {
        PROPERTY_TYPES_BY_NAME.iter().find(|t| t.name == name).copied()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn uses_list(&self) -> bool {
        matches!(self.codec, Codec::List { .. })
    }

    pub fn allows_empty_list(&self) -> bool {
        self.allows_empty_list
    }
}

const PROPERTY_TYPES_BY_NAME: &[PropertyType] = &[
    PropertyType::NONE,
    PropertyType::NUMBER,
    PropertyType::REAL,
    PropertyType::DOUBLE,
    PropertyType::COLOUR,
    PropertyType::SIMPLETEXT,
    PropertyType::TEXT,
    PropertyType::POINT,
    PropertyType::MOVE,
    PropertyType::POINT_LIST,
    PropertyType::POINT_ELIST,
    PropertyType::STONE_LIST,
    PropertyType::AP,
    PropertyType::ARLN_LIST,
    PropertyType::FG,
    PropertyType::LB_LIST,
];

const PROPERTY_TYPES_BY_IDENT: &[(&str, PropertyType)] = &[
    ("AB", PropertyType::STONE_LIST),
    ("AE", PropertyType::POINT_LIST),
    ("AN", PropertyType::SIMPLETEXT),
    ("AP", PropertyType::AP),
    ("AR", PropertyType::ARLN_LIST),
    ("AW", PropertyType::STONE_LIST),
    ("B", PropertyType::MOVE),
    ("BL", PropertyType::REAL),
    ("BM", PropertyType::DOUBLE),
    ("BR", PropertyType::SIMPLETEXT),
    ("BT", PropertyType::SIMPLETEXT),
    ("C", PropertyType::TEXT),
    ("CA", PropertyType::SIMPLETEXT),
    ("CP", PropertyType::SIMPLETEXT),
    ("CR", PropertyType::POINT_LIST),
    ("DD", PropertyType::POINT_ELIST),
    ("DM", PropertyType::DOUBLE),
    ("DO", PropertyType::NONE),
    ("DT", PropertyType::SIMPLETEXT),
    ("EV", PropertyType::SIMPLETEXT),
    ("FF", PropertyType::NUMBER),
    ("FG", PropertyType::FG),
    ("GB", PropertyType::DOUBLE),
    ("GC", PropertyType::TEXT),
    ("GM", PropertyType::NUMBER),
    ("GN", PropertyType::SIMPLETEXT),
    ("GW", PropertyType::DOUBLE),
    ("HA", PropertyType::NUMBER),
    ("HO", PropertyType::DOUBLE),
    ("IT", PropertyType::NONE),
    ("KM", PropertyType::REAL),
    ("KO", PropertyType::NONE),
    ("LB", PropertyType::LB_LIST),
    ("LN", PropertyType::ARLN_LIST),
    ("MA", PropertyType::POINT_LIST),
    ("MN", PropertyType::NUMBER),
    ("N", PropertyType::SIMPLETEXT),
    ("OB", PropertyType::NUMBER),
    ("ON", PropertyType::SIMPLETEXT),
    ("OT", PropertyType::SIMPLETEXT),
    ("OW", PropertyType::NUMBER),
    ("PB", PropertyType::SIMPLETEXT),
    ("PC", PropertyType::SIMPLETEXT),
    ("PL", PropertyType::COLOUR),
    ("PM", PropertyType::NUMBER),
    ("PW", PropertyType::SIMPLETEXT),
    ("RE", PropertyType::SIMPLETEXT),
    ("RO", PropertyType::SIMPLETEXT),
    ("RU", PropertyType::SIMPLETEXT),
    ("SL", PropertyType::POINT_LIST),
    ("SO", PropertyType::SIMPLETEXT),
    ("SQ", PropertyType::POINT_LIST),
    ("ST", PropertyType::NUMBER),
    ("SZ", PropertyType::NUMBER),
    ("TB", PropertyType::POINT_ELIST),
    ("TE", PropertyType::DOUBLE),
    ("TM", PropertyType::REAL),
    ("TR", PropertyType::POINT_LIST),
    ("TW", PropertyType::POINT_ELIST),
    ("UC", PropertyType::DOUBLE),
    ("US", PropertyType::SIMPLETEXT),
    ("V", PropertyType::REAL),
    ("VW", PropertyType::POINT_ELIST),
    ("W", PropertyType::MOVE),
    ("WL", PropertyType::REAL),
    ("WR", PropertyType::SIMPLETEXT),
    ("WT", PropertyType::SIMPLETEXT),
];

// ---------------------------------------------------------------------------
// Board points
// ---------------------------------------------------------------------------

/// Decodes a point or move. Returns `None` for a pass: an empty value, or
/// `tt` on boards no larger than 19x19.
pub fn interpret_go_point(s: &[u8], size: usize) -> Result<Option<Point>> {
    if s.is_empty() || (s == b"tt" && size <= 19) {
        return Ok(None);
    }
    let &[col_s, row_s] = s else {
        return Err(SgfError::value(format!(
            "bad point: {}",
            String::from_utf8_lossy(s)
        )));
    };
    let col = col_s as isize - b'a' as isize;
    let row = size as isize - (row_s as isize - b'a' as isize) - 1;
    let in_range = |n: isize| 0 <= n && n < size as isize;
    if !(in_range(col) && in_range(row)) {
        return Err(SgfError::value(format!(
            "point out of range for size {}: {}",
            size,
            String::from_utf8_lossy(s)
        )));
    }
    Ok(Some((row as usize, col as usize)))
}

/// Encodes a point or move. A pass is `tt` on boards up to 19x19, else empty.
pub fn serialise_go_point(mv: Option<Point>, size: usize) -> Result<Vec<u8>> {
    if !(1..=MAX_BOARD_SIZE).contains(&size) {
        return Err(SgfError::value(format!("board size out of range: {}", size)));
    }
    let Some((row, col)) = mv else {
        return Ok(if size <= 19 { b"tt".to_vec() } else { Vec::new() });
    };
    if row >= size || col >= size {
        return Err(SgfError::value(format!(
            "point out of range for size {}: ({}, {})",
            size, row, col
        )));
    }
    Ok(vec![b'a' + col as u8, b'a' + (size - row - 1) as u8])
}

fn wrong_type(expected: &str, value: &PropertyValue) -> SgfError {
    SgfError::value(format!("expected {} value, got {:?}", expected, value))
}

// ---------------------------------------------------------------------------
// Scalar codecs
// ---------------------------------------------------------------------------

fn interpret_none(_s: &[u8], _context: &Context) -> Result<PropertyValue> {
    Ok(PropertyValue::Bool(true))
}

fn serialise_none(_value: &PropertyValue, _context: &Context) -> Result<Vec<u8>> {
    Ok(Vec::new())
}

fn parse_integer(s: &[u8]) -> Result<i64> {
    std::str::from_utf8(s)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| SgfError::value(format!("not a number: {}", String::from_utf8_lossy(s))))
}

fn interpret_number(s: &[u8], _context: &Context) -> Result<PropertyValue> {
    parse_integer(s).map(PropertyValue::Number)
}

fn serialise_number(value: &PropertyValue, _context: &Context) -> Result<Vec<u8>> {
    match value {
        PropertyValue::Number(n) => Ok(n.to_string().into_bytes()),
        other => Err(wrong_type("number", other)),
    }
}

fn interpret_real(s: &[u8], _context: &Context) -> Result<PropertyValue> {
    let result = std::str::from_utf8(s)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .ok_or_else(|| SgfError::value(format!("not a real number: {}", String::from_utf8_lossy(s))))?;
    if result.is_infinite() {
        return Err(SgfError::value("infinite"));
    }
    if result.is_nan() {
        return Err(SgfError::value("not a number"));
    }
    Ok(PropertyValue::Real(result))
}

fn serialise_real(value: &PropertyValue, _context: &Context) -> Result<Vec<u8>> {
    let f = value.as_real().ok_or_else(|| wrong_type("real", value))?;
    if !f.is_finite() {
        return Err(SgfError::value(format!("cannot serialise {}", f)));
    }
    let s = if f == 0.0 {
        "0".to_string()
    } else if f.fract() == 0.0 {
        format!("{:.0}", f)
    } else if f.abs() < 1e-4 {
        // Too small to write without an exponent.
        "0".to_string()
    } else {
        f.to_string()
    };
    Ok(s.into_bytes())
}

fn interpret_double(s: &[u8], _context: &Context) -> Result<PropertyValue> {
    Ok(PropertyValue::Double(if s.trim_ascii() == b"2" { 2 } else { 1 }))
}

fn serialise_double(value: &PropertyValue, _context: &Context) -> Result<Vec<u8>> {
    match value {
        PropertyValue::Double(2) | PropertyValue::Number(2) => Ok(b"2".to_vec()),
        PropertyValue::Double(_) | PropertyValue::Number(_) => Ok(b"1".to_vec()),
        other => Err(wrong_type("double", other)),
    }
}

fn interpret_colour(s: &[u8], _context: &Context) -> Result<PropertyValue> {
    match s {
        b"b" | b"B" => Ok(PropertyValue::Colour(Colour::Black)),
        b"w" | b"W" => Ok(PropertyValue::Colour(Colour::White)),
        _ => Err(SgfError::value(format!("bad colour: {}", String::from_utf8_lossy(s)))),
    }
}

fn serialise_colour(value: &PropertyValue, _context: &Context) -> Result<Vec<u8>> {
    match value {
        PropertyValue::Colour(Colour::Black) => Ok(b"B".to_vec()),
        PropertyValue::Colour(Colour::White) => Ok(b"W".to_vec()),
        other => Err(wrong_type("colour", other)),
    }
}

fn decode_simpletext(s: &[u8], context: &Context) -> Result<String> {
    context.decode(&simpletext_value(s))
}

fn encode_text(text: &str, context: &Context) -> Result<Vec<u8>> {
    Ok(escape_text(&context.encode(text)?))
}

fn interpret_simpletext(s: &[u8], context: &Context) -> Result<PropertyValue> {
    decode_simpletext(s, context).map(PropertyValue::Text)
}

fn interpret_text(s: &[u8], context: &Context) -> Result<PropertyValue> {
    context.decode(&text_value(s)).map(PropertyValue::Text)
}

fn serialise_text(value: &PropertyValue, context: &Context) -> Result<Vec<u8>> {
    match value {
        PropertyValue::Text(text) => encode_text(text, context),
        other => Err(wrong_type("text", other)),
    }
}

fn require_point(s: &[u8], context: &Context) -> Result<Point> {
    interpret_go_point(s, context.size)?
        .ok_or_else(|| SgfError::value("expected a point, not a pass"))
}

fn interpret_point(s: &[u8], context: &Context) -> Result<PropertyValue> {
    require_point(s, context).map(PropertyValue::Point)
}

fn serialise_point(value: &PropertyValue, context: &Context) -> Result<Vec<u8>> {
    match value {
        PropertyValue::Point(point) | PropertyValue::Move(Some(point)) => {
            serialise_go_point(Some(*point), context.size)
        }
        other => Err(wrong_type("point", other)),
    }
}

fn interpret_move(s: &[u8], context: &Context) -> Result<PropertyValue> {
    interpret_go_point(s, context.size).map(PropertyValue::Move)
}

fn serialise_move(value: &PropertyValue, context: &Context) -> Result<Vec<u8>> {
    match value {
        PropertyValue::Move(mv) => serialise_go_point(*mv, context.size),
        PropertyValue::Point(point) => serialise_go_point(Some(*point), context.size),
        other => Err(wrong_type("move", other)),
    }
}

fn interpret_ap(s: &[u8], context: &Context) -> Result<PropertyValue> {
    let (application, version) = parse_compose(s);
    Ok(PropertyValue::Application(
        decode_simpletext(application, context)?,
        decode_simpletext(version.unwrap_or_default(), context)?,
    ))
}

fn serialise_ap(value: &PropertyValue, context: &Context) -> Result<Vec<u8>> {
    match value {
        PropertyValue::Application(application, version) => Ok(compose(
            &encode_text(application, context)?,
            &encode_text(version, context)?,
        )),
        other => Err(wrong_type("application", other)),
    }
}

fn interpret_fg(s: &[u8], context: &Context) -> Result<PropertyValue> {
    if s.is_empty() {
        return Ok(PropertyValue::Figure(None));
    }
    let (flags, name) = parse_compose(s);
    let flags = parse_integer(flags)?;
    let name = decode_simpletext(name.unwrap_or_default(), context)?;
    Ok(PropertyValue::Figure(Some((flags, name))))
}

fn serialise_fg(value: &PropertyValue, context: &Context) -> Result<Vec<u8>> {
    match value {
        PropertyValue::Figure(None) => Ok(Vec::new()),
        PropertyValue::Figure(Some((flags, name))) => {
            let mut result = flags.to_string().into_bytes();
            result.push(b':');
            result.extend(encode_text(name, context)?);
            Ok(result)
        }
        other => Err(wrong_type("figure", other)),
    }
}

// ---------------------------------------------------------------------------
// List codecs
// ---------------------------------------------------------------------------

fn interpret_point_list(values: &[Vec<u8>], context: &Context) -> Result<PropertyValue> {
    let mut result = BTreeSet::new();
    for s in values {
        match s.iter().position(|&c| c == b':') {
            Some(split) => {
                let (top, left) = require_point(&s[..split], context)?;
                let (bottom, right) = require_point(&s[split + 1..], context)?;
                if !(bottom <= top && left <= right) {
                    return Err(SgfError::value(format!(
                        "bad rectangle: {}",
                        String::from_utf8_lossy(s)
                    )));
                }
                for row in bottom..=top {
                    for col in left..=right {
                        result.insert((row, col));
                    }
                }
            }
            None => {
                result.insert(require_point(s, context)?);
            }
        }
    }
    Ok(PropertyValue::PointList(result))
}

fn serialise_point_list(value: &PropertyValue, context: &Context) -> Result<Vec<Vec<u8>>> {
    let points = value
        .as_point_list()
        .ok_or_else(|| wrong_type("point list", value))?;
    let mut result = points
        .iter()
        .map(|&point| serialise_go_point(Some(point), context.size))
        .collect::<Result<Vec<_>>>()?;
    result.sort();
    Ok(result)
}

fn split_composed(s: &[u8]) -> Result<(&[u8], &[u8])> {
    match parse_compose(s) {
        (first, Some(second)) => Ok((first, second)),
        (_, None) => Err(SgfError::value(format!(
            "expected a composed value: {}",
            String::from_utf8_lossy(s)
        ))),
    }
}

fn interpret_arln_list(values: &[Vec<u8>], context: &Context) -> Result<PropertyValue> {
    values
        .iter()
        .map(|s| {
            let (p1, p2) = split_composed(s)?;
            Ok((require_point(p1, context)?, require_point(p2, context)?))
        })
        .collect::<Result<Vec<_>>>()
        .map(PropertyValue::PointPairs)
}

fn serialise_arln_list(value: &PropertyValue, context: &Context) -> Result<Vec<Vec<u8>>> {
    let PropertyValue::PointPairs(pairs) = value else {
        return Err(wrong_type("point pairs", value));
    };
    pairs
        .iter()
        .map(|&(p1, p2)| {
            Ok([
                serialise_go_point(Some(p1), context.size)?,
                serialise_go_point(Some(p2), context.size)?,
            ]
            .join(&b':'))
        })
        .collect()
}

fn interpret_lb_list(values: &[Vec<u8>], context: &Context) -> Result<PropertyValue> {
    values
        .iter()
        .map(|s| {
            let (point, label) = split_composed(s)?;
            Ok((require_point(point, context)?, decode_simpletext(label, context)?))
        })
        .collect::<Result<Vec<_>>>()
        .map(PropertyValue::Labels)
}

fn serialise_lb_list(value: &PropertyValue, context: &Context) -> Result<Vec<Vec<u8>>> {
    let PropertyValue::Labels(labels) = value else {
        return Err(wrong_type("labels", value));
    };
    labels
        .iter()
        .map(|(point, label)| {
            let mut result = serialise_go_point(Some(*point), context.size)?;
            result.push(b':');
            result.extend(encode_text(label, context)?);
            Ok(result)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Presenter
// ---------------------------------------------------------------------------

/// Converts between raw and interpreted property values for one game.
#[derive(Clone)]
pub struct Presenter {
    context: Context,
    property_types_by_ident: HashMap<String, PropertyType>,
    default_property_type: Option<PropertyType>,
}

impl Presenter {
    pub fn new(size: usize, encoding: &str) -> Result<Self> {
        Self::with_codec(size, encoding, Arc::new(BuiltinCharsets))
    }

    /// Builds a presenter whose text codecs go through `charsets`.
    ///
    /// Fails if `charsets` does not know `encoding`.
    pub fn with_codec(size: usize, encoding: &str, charsets: Arc<dyn CharsetCodec>) -> Result<Self> {
        let encoding = charsets
            .normalise(encoding)
            .map_err(|_| SgfError::encoding(format!("unknown encoding: {}", encoding)))?;
        Ok(Presenter {
            context: Context {
                size,
                encoding,
                charsets,
            },
            property_types_by_ident: PROPERTY_TYPES_BY_IDENT
                .iter()
                .map(|&(ident, property_type)| (ident.to_string(), property_type))
                .collect(),
            default_property_type: Some(PropertyType::TEXT),
        })
    }

    pub fn size(&self) -> usize {
        self.context.size
    }

    pub fn encoding(&self) -> &str {
        &self.context.encoding
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn charsets(&self) -> &dyn CharsetCodec {
        self.context.charsets()
    }

    /// The type used for `identifier`, falling back to the private-property type.
    pub fn get_property_type(&self, identifier: &str) -> Result<PropertyType> {
        self.property_types_by_ident
            .get(identifier)
            .copied()
            .or(self.default_property_type)
            .ok_or_else(|| SgfError::property(format!("unknown property: {}", identifier)))
    }

    pub fn register_property(&mut self, identifier: &str, property_type: PropertyType) {
        self.property_types_by_ident
            .insert(identifier.to_string(), property_type);
    }

    /// Removes the registration for `identifier`, returning it if there was one.
    pub fn deregister_property(&mut self, identifier: &str) -> Option<PropertyType> {
        self.property_types_by_ident.remove(identifier)
    }

    /// Sets the type used for identifiers with no registration; `None`
    /// makes such identifiers an error.
    pub fn set_private_property_type(&mut self, property_type: Option<PropertyType>) {
        self.default_property_type = property_type;
    }

    pub fn interpret_as_type(&self, property_type: PropertyType, raw_values: &[Vec<u8>]) -> Result<PropertyValue> {
        let Some(first) = raw_values.first() else {
            return Err(SgfError::property("no raw values"));
        };
        match property_type.codec {
            Codec::List { interpret, .. } => {
                let raw: &[Vec<u8>] = if raw_values.len() == 1 && first.is_empty() {
                    &[]
                } else {
                    raw_values
                };
                interpret(raw, &self.context)
            }
            Codec::Scalar { interpret, .. } => {
                if raw_values.len() > 1 {
                    return Err(SgfError::property("multiple values"));
                }
                interpret(first, &self.context)
            }
        }
    }

    pub fn interpret(&self, identifier: &str, raw_values: &[Vec<u8>]) -> Result<PropertyValue> {
        self.interpret_as_type(self.get_property_type(identifier)?, raw_values)
    }

    pub fn serialise_as_type(&self, property_type: PropertyType, value: &PropertyValue) -> Result<Vec<Vec<u8>>> {
        match property_type.codec {
            Codec::Scalar { serialise, .. } => Ok(vec![serialise(value, &self.context)?]),
            Codec::List { serialise, .. } => {
                let serialised = serialise(value, &self.context)?;
                if !serialised.is_empty() {
                    Ok(serialised)
                } else if property_type.allows_empty_list {
                    Ok(vec![Vec::new()])
                } else {
                    Err(SgfError::property("empty list"))
                }
            }
        }
    }

    pub fn serialise(&self, identifier: &str, value: &PropertyValue) -> Result<Vec<Vec<u8>>> {
        self.serialise_as_type(self.get_property_type(identifier)?, value)
    }
}

impl fmt::Debug for Presenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Presenter")
            .field("size", &self.context.size)
            .field("encoding", &self.context.encoding)
            .field("registered", &self.property_types_by_ident.len())
            .finish()
    }
}

impl Default for Presenter {
    fn default() -> Self {
        Presenter {
            context: Context {
                size: 19,
                encoding: UTF_8.to_string(),
                charsets: Arc::new(BuiltinCharsets),
            },
            property_types_by_ident: PROPERTY_TYPES_BY_IDENT
                .iter()
                .map(|&(ident, property_type)| (ident.to_string(), property_type))
                .collect(),
            default_property_type: Some(PropertyType::TEXT),
        }
    }
}
