//! SGF grammar: tokenising, coarse game trees and their serialised form.
//!
//! A coarse game tree mirrors the SGF grammar directly: a `sequence` of
//! property maps (one per node on an unbranching line) followed by the
//! `children` variations. Everything here works with explicit stacks so that
//! deeply nested variations cannot exhaust the call stack.

use crate::error::{Result, SgfError};
use nom::{
    branch::alt,
    bytes::complete::{is_not, take, take_while, take_while_m_n},
    character::complete::{char, one_of},
    combinator::{map, recognize},
    multi::many0,
    sequence::{delimited, pair, preceded},
    IResult, Parser,
};
use std::borrow::Borrow;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Raw property values keyed by property identifier.
pub type PropertyMap = HashMap<String, Vec<Vec<u8>>>;

pub const DEFAULT_WRAP: usize = 79;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    /// Contents of a `[...]` value with escapes left intact.
    Value(&'a [u8]),
    Ident(&'a [u8]),
    /// One of `(`, `)` or `;`.
    Delim(u8),
}

/// A game tree in the flat form produced by the parser.
#[derive(Debug, PartialEq)]
pub struct CoarseGameTree<M = PropertyMap> {
    pub sequence: Vec<M>,
    pub children: Vec<CoarseGameTree<M>>,
}

impl<M> CoarseGameTree<M> {
    pub fn new() -> Self {
        CoarseGameTree {
            sequence: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Iterates over the property maps of the main line (first variation at every fork).
    pub fn main_sequence_iter(&self) -> CoarseMainSequence<'_, M> {
        CoarseMainSequence {
            tree: Some(self),
            index: 0,
        }
    }
}

impl<M> Default for CoarseGameTree<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Drop for CoarseGameTree<M> {
    fn drop(&mut self) {
        // Flatten the subtree so dropping it never recurses.
        let mut to_drop = std::mem::take(&mut self.children);
        while let Some(mut tree) = to_drop.pop() {
            to_drop.append(&mut tree.children);
        }
    }
}

pub struct CoarseMainSequence<'a, M> {
    tree: Option<&'a CoarseGameTree<M>>,
    index: usize,
}

impl<'a, M> Iterator for CoarseMainSequence<'a, M> {
    type Item = &'a M;

    fn next(&mut self) -> Option<&'a M> {
        loop {
            let tree = self.tree?;
            if let Some(properties) = tree.sequence.get(self.index) {
                self.index += 1;
                return Some(properties);
            }
            self.tree = tree.children.first();
            self.index = 0;
        }
    }
}

fn is_sgf_whitespace(c: u8) -> bool {
    c.is_ascii_whitespace() || c == 0x0b
}

fn is_property_ident_char(c: u8) -> bool {
    c.is_ascii_uppercase()
}

/// Parser for the inside of a bracketed value: anything but an unescaped `]`
fn value_body(input: &[u8]) -> IResult<&[u8], &[u8]> {
    recognize(many0(alt((
        is_not(&b"\\]"[..]),
        recognize(pair(char('\\'), take(1usize))),
    ))))
    .parse(input)
}

fn property_value(input: &[u8]) -> IResult<&[u8], &[u8]> {
    delimited(char('['), value_body, char(']')).parse(input)
}

fn property_ident(input: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while_m_n(1, 8, is_property_ident_char).parse(input)
}

fn token(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    preceded(
        take_while(is_sgf_whitespace),
        alt((
            map(property_value, Token::Value),
            map(property_ident, Token::Ident),
            map(one_of("();"), |c: char| Token::Delim(c as u8)),
        )),
    )
    .parse(input)
}

pub fn is_valid_property_identifier(s: &str) -> bool {
    (1..=8).contains(&s.len()) && s.bytes().all(is_property_ident_char)
}

/// True if `s` can be placed between brackets without further escaping.
pub fn is_valid_property_value(s: &[u8]) -> bool {
    matches!(value_body(s), Ok((rest, _)) if rest.is_empty())
}

/// Finds the next `(` followed (after optional whitespace) by `;`.
fn find_game_start(data: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i < data.len() {
        let open = i + data[i..].iter().position(|&c| c == b'(')?;
        let mut j = open + 1;
        while j < data.len() && is_sgf_whitespace(data[j]) {
            j += 1;
        }
        if data.get(j) == Some(&b';') {
            return Some(open);
        }
        i = open + 1;
    }
    None
}

/// Tokenises one game tree starting at the first game-start marker at or after `start`.
///
/// Returns the tokens up to and including the `)` that balances the opening
/// parenthesis, and the offset just past the last token. Tokenising stops
/// early at the first byte that does not begin a token; the builder reports
/// the resulting structural error. If no game starts after `start`, returns
/// no tokens and `start` unchanged.
pub fn tokenise(data: &[u8], start: usize) -> (Vec<Token<'_>>, usize) {
    let Some(begin) = find_game_start(data, start) else {
        return (Vec::new(), start);
    };
    let mut tokens = Vec::new();
    let mut rest = &data[begin..];
    let mut depth = 0usize;
    while let Ok((remaining, tok)) = token(rest) {
        rest = remaining;
        tokens.push(tok);
        match tok {
            Token::Delim(b'(') => depth += 1,
            Token::Delim(b')') => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    break;
                }
            }
            _ => {}
        }
    }
    (tokens, data.len() - rest.len())
}

fn unexpected_end() -> SgfError {
    SgfError::grammar("unexpected end of SGF data")
}

/// Builds one coarse game tree from the data at `start`.
///
/// Returns `None` when there are no more game trees.
fn parse_game_tree(data: &[u8], start: usize) -> Result<Option<(CoarseGameTree, usize)>> {
    let (tokens, end) = tokenise(data, start);
    if tokens.is_empty() {
        return Ok(None);
    }
    trace!(tokens = tokens.len(), start, end, "tokenised game tree");

    let mut stack: Vec<CoarseGameTree> = Vec::new();
    let mut current: Option<CoarseGameTree> = None;
    let mut sequence_open = false;
    let mut node_open = false;
    let mut saw_property = false;
    let mut tokens = tokens.into_iter().peekable();

    loop {
        let tok = tokens.next().ok_or_else(unexpected_end)?;
        match tok {
            Token::Value(_) => return Err(SgfError::grammar("unexpected value")),
            Token::Delim(b';') => match current.as_mut() {
                Some(tree) if sequence_open => {
                    tree.sequence.push(PropertyMap::new());
                    node_open = true;
                }
                _ => return Err(SgfError::grammar("unexpected node")),
            },
            Token::Delim(delim) => {
                if sequence_open {
                    if current.as_ref().map_or(true, |tree| tree.sequence.is_empty()) {
                        return Err(SgfError::grammar("empty sequence"));
                    }
                    sequence_open = false;
                }
                node_open = false;
                if delim == b'(' {
                    if let Some(tree) = current.take() {
                        stack.push(tree);
                    }
                    current = Some(CoarseGameTree::new());
                    sequence_open = true;
                } else {
                    let finished = current.take().ok_or_else(|| SgfError::grammar("unexpected ')'"))?;
                    match stack.pop() {
                        Some(mut parent) => {
                            parent.children.push(finished);
                            current = Some(parent);
                        }
                        None => {
                            if !saw_property {
                                return Err(SgfError::grammar("empty sequence"));
                            }
                            return Ok(Some((finished, end)));
                        }
                    }
                }
            }
            Token::Ident(ident) => {
                let mut values = Vec::new();
                while let Some(Token::Value(value)) = tokens.peek() {
                    values.push(value.to_vec());
                    tokens.next();
                }
                if tokens.peek().is_none() {
                    return Err(unexpected_end());
                }
                if values.is_empty() {
                    return Err(SgfError::grammar("property with no values"));
                }
                let properties = match current.as_mut() {
                    Some(tree) if node_open => tree.sequence.last_mut(),
                    _ => None,
                }
                .ok_or_else(|| SgfError::grammar("property value outside a node"))?;
                properties
                    .entry(String::from_utf8_lossy(ident).into_owned())
                    .or_default()
                    .extend(values);
                saw_property = true;
            }
        }
    }
}

/// Parses the first game tree in `data`.
pub fn parse_sgf_game(data: &[u8]) -> Result<CoarseGameTree> {
    match parse_game_tree(data, 0)? {
        Some((game_tree, _)) => Ok(game_tree),
        None => Err(SgfError::grammar("no SGF data found")),
    }
}

/// Parses every game tree in `data`.
pub fn parse_sgf_collection(data: &[u8]) -> Result<Vec<CoarseGameTree>> {
    let mut position = 0;
    let mut result = Vec::new();
    loop {
        match parse_game_tree(data, position).map_err(|e| e.in_game(result.len()))? {
            Some((game_tree, end)) => {
                result.push(game_tree);
                position = end;
            }
            None => break,
        }
    }
    if result.is_empty() {
        return Err(SgfError::grammar("no SGF data found"));
    }
    debug!(games = result.len(), "parsed SGF collection");
    Ok(result)
}

/// Joins `pieces` into lines no longer than `width` without splitting a piece.
///
/// A piece longer than `width` gets a line of its own.
pub fn block_format(pieces: &[Vec<u8>], width: usize) -> Vec<u8> {
    let mut lines: Vec<Vec<u8>> = Vec::new();
    let mut line: Vec<u8> = Vec::new();
    for piece in pieces {
        if !line.is_empty() && line.len() + piece.len() > width {
            lines.push(std::mem::take(&mut line));
        }
        line.extend_from_slice(piece);
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines.join(&b'\n')
}

fn property_order(ident: &str) -> (bool, &str) {
    (ident != "FF", ident)
}

/// Renders a coarse game tree as the pieces a line may be broken between.
///
/// Each piece is a delimiter or one whole property (identifier and all its
/// values). Properties are written with `FF` first and the rest in
/// identifier order.
pub fn game_tree_pieces<M: Borrow<PropertyMap>>(game_tree: &CoarseGameTree<M>) -> Vec<Vec<u8>> {
    let mut pieces: Vec<Vec<u8>> = Vec::new();
    let mut to_serialise: Vec<Option<&CoarseGameTree<M>>> = vec![Some(game_tree)];
    while let Some(entry) = to_serialise.pop() {
        let Some(tree) = entry else {
            pieces.push(b")".to_vec());
            continue;
        };
        pieces.push(b"(".to_vec());
        for properties in &tree.sequence {
            pieces.push(b";".to_vec());
            let mut entries: Vec<(&String, &Vec<Vec<u8>>)> = properties.borrow().iter().collect();
            entries.sort_by(|a, b| property_order(a.0).cmp(&property_order(b.0)));
            for (ident, values) in entries {
                let mut piece = ident.as_bytes().to_vec();
                for value in values {
                    piece.push(b'[');
                    piece.extend_from_slice(value);
                    piece.push(b']');
                }
                pieces.push(piece);
            }
        }
        to_serialise.push(None);
        to_serialise.extend(tree.children.iter().rev().map(Some));
    }
    pieces
}

/// Joins rendered pieces into the final document.
///
/// `wrap` is the maximum line width; 0 writes everything on one line. The
/// result always ends with a newline.
pub fn join_pieces(pieces: &[Vec<u8>], wrap: usize) -> Vec<u8> {
    let mut result = if wrap == 0 {
        pieces.concat()
    } else {
        block_format(pieces, wrap)
    };
    result.push(b'\n');
    result
}

/// Serialises a coarse game tree; see [`game_tree_pieces`] and [`join_pieces`].
pub fn serialise_game_tree<M: Borrow<PropertyMap>>(game_tree: &CoarseGameTree<M>, wrap: usize) -> Vec<u8> {
    join_pieces(&game_tree_pieces(game_tree), wrap)
}

/// Materialises `game_tree` below `root`.
///
/// `root` stands for the first node of the tree's sequence, which is not
/// passed to `build_child`. `build_child(parent, properties)` must create a
/// node, append it to `parent`'s children and return it. Returns the number
/// of nodes built.
pub fn make_tree<M, N: Copy>(
    game_tree: &CoarseGameTree<M>,
    root: N,
    mut build_child: impl FnMut(N, &M) -> N,
) -> usize {
    let mut built = 0;
    let rest: &[M] = game_tree.sequence.get(1..).unwrap_or_default();
    let mut to_build = vec![(root, rest, game_tree.children.as_slice())];
    while let Some((mut node, sequence, children)) = to_build.pop() {
        for properties in sequence {
            node = build_child(node, properties);
            built += 1;
        }
        for child_tree in children {
            let Some((first, rest)) = child_tree.sequence.split_first() else {
                continue;
            };
            let child = build_child(node, first);
            built += 1;
            to_build.push((child, rest, child_tree.children.as_slice()));
        }
    }
    built
}

/// Builds a coarse game tree from a linked tree.
///
/// Nodes with exactly one child continue their parent's sequence; the tree
/// only branches where a node has several children.
pub fn make_coarse_game_tree<'a, N, M>(
    root: N,
    get_children: impl Fn(N) -> &'a [N],
    get_properties: impl Fn(N) -> M,
) -> CoarseGameTree<M>
where
    N: Copy + 'a,
{
    let mut trees: Vec<CoarseGameTree<M>> = vec![CoarseGameTree::new()];
    let mut child_links: Vec<Vec<usize>> = vec![Vec::new()];
    let mut to_flatten = vec![(0usize, root)];
    while let Some((tree_index, mut node)) = to_flatten.pop() {
        loop {
            trees[tree_index].sequence.push(get_properties(node));
            let children = get_children(node);
            if let [only_child] = children {
                node = *only_child;
                continue;
            }
            for &child in children {
                let child_index = trees.len();
                trees.push(CoarseGameTree::new());
                child_links.push(Vec::new());
                child_links[tree_index].push(child_index);
                to_flatten.push((child_index, child));
            }
            break;
        }
    }
    // Children always come after their parent, so assembling back to front
    // attaches every subtree before it is moved into its parent.
    for parent in (0..trees.len()).rev() {
        let links = std::mem::take(&mut child_links[parent]);
        let children: Vec<CoarseGameTree<M>> = links
            .into_iter()
            .map(|child| std::mem::take(&mut trees[child]))
            .collect();
        trees[parent].children = children;
    }
    trees.swap_remove(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &[&str])]) -> PropertyMap {
        pairs
            .iter()
            .map(|(ident, values)| {
                (
                    ident.to_string(),
                    values.iter().map(|v| v.as_bytes().to_vec()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_tokenise() {
        let (tokens, end) = tokenise(b"junk (;B[aa]\n C[a\\]b] ) trailing", 0);
        assert_eq!(
            tokens,
            vec![
                Token::Delim(b'('),
                Token::Delim(b';'),
                Token::Ident(b"B"),
                Token::Value(b"aa"),
                Token::Ident(b"C"),
                Token::Value(b"a\\]b"),
                Token::Delim(b')'),
            ]
        );
        assert_eq!(end, 23);
    }

    #[test]
    fn test_tokenise_no_game() {
        let (tokens, end) = tokenise(b"(no game here)", 3);
        assert!(tokens.is_empty());
        assert_eq!(end, 3);
    }

    #[test]
    fn test_tokenise_stops_at_garbage() {
        let (tokens, _) = tokenise(b"(;B[aa]foo)", 0);
        assert_eq!(tokens.len(), 4);
    }

    #[test]
    fn test_long_identifier_splits() {
        let (tokens, _) = tokenise(b"(;ABCDEFGHIJ[x])", 0);
        assert_eq!(tokens[2], Token::Ident(b"ABCDEFGH"));
        assert_eq!(tokens[3], Token::Ident(b"IJ"));
    }

    #[test]
    fn test_valid_identifiers_and_values() {
        assert!(is_valid_property_identifier("B"));
        assert!(is_valid_property_identifier("ABCDEFGH"));
        assert!(!is_valid_property_identifier(""));
        assert!(!is_valid_property_identifier("ABCDEFGHI"));
        assert!(!is_valid_property_identifier("b"));
        assert!(is_valid_property_value(b""));
        assert!(is_valid_property_value(b"a\\]b"));
        assert!(!is_valid_property_value(b"a]b"));
        assert!(!is_valid_property_value(b"ab\\"));
    }

    #[test]
    fn test_parse_sgf_game() {
        let tree = parse_sgf_game(b"(;FF[4]AB[aa][bb](;B[cc];W[dd])(;B[ee]AB[ff]AB[gg]))").unwrap();
        assert_eq!(tree.sequence, vec![props(&[("FF", &["4"]), ("AB", &["aa", "bb"])])]);
        assert_eq!(tree.children.len(), 2);
        assert_eq!(
            tree.children[0].sequence,
            vec![props(&[("B", &["cc"])]), props(&[("W", &["dd"])])]
        );
        assert_eq!(
            tree.children[1].sequence,
            vec![props(&[("B", &["ee"]), ("AB", &["ff", "gg"])])]
        );
    }

    #[test]
    fn test_parse_errors() {
        let cases: &[(&[u8], &str)] = &[
            (b"", "no SGF data found"),
            (b"(;B[aa]", "unexpected end of SGF data"),
            (b"(;B[aa];W)", "property with no values"),
            (b"(;B[aa](;W[bb]);B[cc])", "unexpected node"),
            (b"(;B[aa]()", "empty sequence"),
            (b"(;)", "empty sequence"),
            (b"(;B[aa](B[bb]))", "property value outside a node"),
            (b"(;B[aa][bb](;W[cc])[dd])", "unexpected value"),
        ];
        for (data, message) in cases {
            match parse_sgf_game(data) {
                Err(SgfError::Grammar(msg)) => assert_eq!(&msg, message, "input {:?}", data),
                other => panic!("expected grammar error for {:?}, got {:?}", data, other),
            }
        }
    }

    #[test]
    fn test_parse_collection() {
        let trees = parse_sgf_collection(b"(;GN[one]) junk (;GN[two](;B[aa]))").unwrap();
        assert_eq!(trees.len(), 2);
        assert_eq!(trees[1].children.len(), 1);
    }

    #[test]
    fn test_parse_collection_reports_game_index() {
        let err = parse_sgf_collection(b"(;GN[one])(;GN[two]").unwrap_err();
        assert_eq!(err.to_string(), "error parsing game 1: grammar error: unexpected end of SGF data");
    }

    #[test]
    fn test_deep_nesting() {
        let depth = 50_000;
        let mut data = Vec::new();
        for _ in 0..depth {
            data.extend_from_slice(b"(;B[aa]");
        }
        data.extend(std::iter::repeat(b')').take(depth));
        let tree = parse_sgf_game(&data).unwrap();
        assert_eq!(tree.main_sequence_iter().count(), depth);
        let serialised = serialise_game_tree(&tree, 0);
        assert_eq!(serialised.len(), data.len() + 1);
    }

    #[test]
    fn test_main_sequence_iter() {
        let tree = parse_sgf_game(b"(;A[1];A[2](;A[3];A[4])(;A[5]))").unwrap();
        let values: Vec<&[u8]> = tree.main_sequence_iter().map(|p| p["A"][0].as_slice()).collect();
        let expected: Vec<&[u8]> = vec![&b"1"[..], &b"2"[..], &b"3"[..], &b"4"[..]];
        assert_eq!(values, expected);
    }

    #[test]
    fn test_serialise_property_order() {
        let tree = parse_sgf_game(b"(;SZ[9]FF[4]C[x]AB[aa][bb];B[cc](;W[dd])(;W[ee]))").unwrap();
        assert_eq!(
            serialise_game_tree(&tree, 0),
            b"(;FF[4]AB[aa][bb]C[x]SZ[9];B[cc](;W[dd])(;W[ee]))\n".to_vec()
        );
    }

    #[test]
    fn test_pieces_keep_properties_whole() {
        let tree = parse_sgf_game(b"(;FF[4]AB[aa][bb];B[cc])").unwrap();
        let pieces = game_tree_pieces(&tree);
        let expected: Vec<&[u8]> = ["(", ";", "FF[4]", "AB[aa][bb]", ";", "B[cc]", ")"]
            .iter()
            .map(|s| s.as_bytes())
            .collect();
        assert_eq!(pieces, expected);
        assert_eq!(join_pieces(&pieces, 0), b"(;FF[4]AB[aa][bb];B[cc])\n".to_vec());
        assert_eq!(join_pieces(&pieces, 10), b"(;FF[4]\nAB[aa][bb]\n;B[cc])\n".to_vec());
    }

    #[test]
    fn test_block_format() {
        let pieces: Vec<Vec<u8>> = ["(", ";", "AB[aa][bb]", "C[x]", ")"]
            .iter()
            .map(|s| s.as_bytes().to_vec())
            .collect();
        assert_eq!(block_format(&pieces, 12), b"(;AB[aa][bb]\nC[x])".to_vec());
        assert_eq!(block_format(&pieces, 4), b"(;\nAB[aa][bb]\nC[x]\n)".to_vec());
    }

    #[test]
    fn test_make_tree_and_back() {
        let tree = parse_sgf_game(b"(;A[1];A[2](;A[3];A[4](;A[5]))(;A[6]))").unwrap();
        let expected = serialise_game_tree(&tree, 0);

        // A minimal arena: (properties, children)
        let mut arena: Vec<(PropertyMap, Vec<usize>)> = vec![(tree.sequence[0].clone(), Vec::new())];
        let built = make_tree(&tree, 0usize, |parent, properties| {
            arena.push((properties.clone(), Vec::new()));
            let child = arena.len() - 1;
            arena[parent].1.push(child);
            child
        });
        assert_eq!(built, 5);
        assert_eq!(arena[0].1.len(), 1);

        let rebuilt = make_coarse_game_tree(0usize, |n| arena[n].1.as_slice(), |n| &arena[n].0);
        assert_eq!(rebuilt.sequence.len(), 2);
        assert_eq!(rebuilt.children.len(), 2);
        assert_eq!(serialise_game_tree(&rebuilt, 0), b"(;A[1];A[2](;A[3];A[4];A[5])(;A[6]))\n".to_vec());
        assert_ne!(serialise_game_tree(&rebuilt, 0), expected);
    }
}
