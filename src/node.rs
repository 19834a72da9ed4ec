//! Property views over the nodes of an [`SgfGame`](crate::SgfGame).
//!
//! [`Node`] borrows a node's properties for reading; [`NodeMut`] also allows
//! editing them. Both interpret values through the game's [`Presenter`].

use crate::error::{Result, SgfError};
use crate::grammar::{is_valid_property_identifier, is_valid_property_value, PropertyMap};
use crate::properties::{interpret_go_point, Colour, Point, Presenter, PropertyValue};
use std::collections::BTreeSet;
use std::fmt;

/// Identifies a node within the game that created it.
///
/// Slots of deleted nodes are reused; the generation tells a stale id from
/// the node that took its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub(crate) game: u64,
    pub(crate) index: usize,
    pub(crate) generation: u32,
}

/// Read access shared by [`Node`] and [`NodeMut`].
pub trait NodeProperties {
    fn property_map(&self) -> &PropertyMap;

    fn presenter(&self) -> &Presenter;

    fn size(&self) -> usize {
        self.presenter().size()
    }

    /// Working encoding of the raw values.
    fn encoding(&self) -> &str {
        self.presenter().encoding()
    }

    fn has_property(&self, identifier: &str) -> bool {
        self.property_map().contains_key(identifier)
    }

    /// Identifiers present on the node, sorted.
    fn properties(&self) -> Vec<&str> {
        let mut identifiers: Vec<&str> = self.property_map().keys().map(String::as_str).collect();
        identifiers.sort_unstable();
        identifiers
    }

    fn get_raw_list(&self, identifier: &str) -> Result<&[Vec<u8>]> {
        self.property_map()
            .get(identifier)
            .map(Vec::as_slice)
            .ok_or_else(|| SgfError::missing(identifier))
    }

    /// First raw value of the property.
    fn get_raw(&self, identifier: &str) -> Result<&[u8]> {
        self.get_raw_list(identifier)?
            .first()
            .map(Vec::as_slice)
            .ok_or_else(|| SgfError::missing(identifier))
    }

    /// Interpreted value of the property.
    fn get(&self, identifier: &str) -> Result<PropertyValue> {
        self.presenter()
            .interpret(identifier, self.get_raw_list(identifier)?)
    }

    /// Colour and raw value of the node's move, if it has one. `B` wins over `W`.
    fn get_raw_move(&self) -> Option<(Colour, &[u8])> {
        [Colour::Black, Colour::White].into_iter().find_map(|colour| {
            self.property_map()
                .get(colour.move_identifier())
                .and_then(|values| values.first())
                .map(|raw| (colour, raw.as_slice()))
        })
    }

    /// Colour and point of the node's move; a pass has no point.
    fn get_move(&self) -> Result<Option<(Colour, Option<Point>)>> {
        match self.get_raw_move() {
            Some((colour, raw)) => Ok(Some((colour, interpret_go_point(raw, self.size())?))),
            None => Ok(None),
        }
    }

    /// Black, white and empty setup points (`AB`, `AW`, `AE`).
    fn get_setup_stones(&self) -> Result<(BTreeSet<Point>, BTreeSet<Point>, BTreeSet<Point>)> {
        let points = |identifier: &str| -> Result<BTreeSet<Point>> {
            if !self.has_property(identifier) {
                return Ok(BTreeSet::new());
            }
            match self.get(identifier)? {
                PropertyValue::PointList(points) => Ok(points),
                other => Err(SgfError::value(format!(
                    "{} is not a point list: {:?}",
                    identifier, other
                ))),
            }
        };
        Ok((points("AB")?, points("AW")?, points("AE")?))
    }

    fn has_setup_stones(&self) -> bool {
        ["AB", "AW", "AE"].iter().any(|id| self.has_property(id))
    }
}

fn write_properties(f: &mut fmt::Formatter<'_>, node: &impl NodeProperties) -> fmt::Result {
    let presenter = node.presenter();
    let decode = |raw: &[u8]| {
        presenter
            .charsets()
            .decode(raw, presenter.encoding())
            .unwrap_or_else(|_| String::from_utf8_lossy(raw).into_owned())
    };
    for identifier in node.properties() {
        write!(f, "{}", identifier)?;
        for value in &node.property_map()[identifier] {
            write!(f, "[{}]", decode(value))?;
        }
        writeln!(f)?;
    }
    Ok(())
}

/// Read-only view of one node.
#[derive(Clone, Copy)]
pub struct Node<'a> {
    properties: &'a PropertyMap,
    presenter: &'a Presenter,
}

impl<'a> Node<'a> {
    pub(crate) fn new(properties: &'a PropertyMap, presenter: &'a Presenter) -> Self {
        Node {
            properties,
            presenter,
        }
    }
}

impl NodeProperties for Node<'_> {
    fn property_map(&self) -> &PropertyMap {
        self.properties
    }

    fn presenter(&self) -> &Presenter {
        self.presenter
    }
}

impl fmt::Display for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_properties(f, self)
    }
}

impl fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("properties", &self.properties())
            .finish()
    }
}

/// Mutable view of one node's properties.
pub struct NodeMut<'a> {
    properties: &'a mut PropertyMap,
    presenter: &'a Presenter,
}

impl<'a> NodeMut<'a> {
    pub(crate) fn new(properties: &'a mut PropertyMap, presenter: &'a Presenter) -> Self {
        NodeMut {
            properties,
            presenter,
        }
    }

    pub fn as_node(&self) -> Node<'_> {
        Node::new(self.properties, self.presenter)
    }

    /// Sets the raw values of a property, replacing any existing ones.
    ///
    /// `SZ` may only be set to the game's board size.
    pub fn set_raw_list(&mut self, identifier: &str, values: Vec<Vec<u8>>) -> Result<()> {
        if !is_valid_property_identifier(identifier) {
            return Err(SgfError::grammar(format!(
                "ill-formed property identifier: {:?}",
                identifier
            )));
        }
        if values.is_empty() {
            return Err(SgfError::property(format!("empty value list for {}", identifier)));
        }
        if let Some(bad) = values.iter().find(|v| !is_valid_property_value(v)) {
            return Err(SgfError::grammar(format!(
                "ill-formed raw property value: {:?}",
                String::from_utf8_lossy(bad)
            )));
        }
        if identifier == "SZ" && values != [self.presenter.size().to_string().into_bytes()] {
            return Err(SgfError::structural("changing size is not permitted"));
        }
        self.properties.insert(identifier.to_string(), values);
        Ok(())
    }

    pub fn set_raw(&mut self, identifier: &str, value: impl Into<Vec<u8>>) -> Result<()> {
        self.set_raw_list(identifier, vec![value.into()])
    }

    /// Removes a property. `SZ` can only be removed when the board is 19x19.
    pub fn unset(&mut self, identifier: &str) -> Result<()> {
        if identifier == "SZ" && self.presenter.size() != 19 {
            return Err(SgfError::structural("changing size is not permitted"));
        }
        self.properties
            .remove(identifier)
            .map(|_| ())
            .ok_or_else(|| SgfError::missing(identifier))
    }

    /// Serialises `value` with the property's type and stores it.
    pub fn set(&mut self, identifier: &str, value: impl Into<PropertyValue>) -> Result<()> {
        let raw = self.presenter.serialise(identifier, &value.into())?;
        self.set_raw_list(identifier, raw)
    }

    /// Replaces any `B` or `W` property with a move for `colour`.
    pub fn set_move(&mut self, colour: Colour, mv: Option<Point>) -> Result<()> {
        let raw = self
            .presenter
            .serialise(colour.move_identifier(), &PropertyValue::Move(mv))?;
        self.properties.remove("B");
        self.properties.remove("W");
        self.set_raw_list(colour.move_identifier(), raw)
    }

    /// Replaces the `AB`, `AW` and `AE` properties. Empty sets are left unset.
    pub fn set_setup_stones(
        &mut self,
        black: &BTreeSet<Point>,
        white: &BTreeSet<Point>,
        empty: &BTreeSet<Point>,
    ) -> Result<()> {
        for identifier in ["AB", "AW", "AE"] {
            self.properties.remove(identifier);
        }
        for (identifier, points) in [("AB", black), ("AW", white), ("AE", empty)] {
            if !points.is_empty() {
                self.set(identifier, PropertyValue::PointList(points.clone()))?;
            }
        }
        Ok(())
    }

    /// Appends to the `C` property, separated from existing text by a blank line.
    pub fn add_comment_text(&mut self, text: &str) -> Result<()> {
        let comment = match self.get("C") {
            Ok(PropertyValue::Text(existing)) => format!("{}\n\n{}", existing, text),
            Ok(_) => text.to_string(),
            Err(e) if e.is_missing_property() => text.to_string(),
            Err(e) => return Err(e),
        };
        self.set("C", comment)
    }
}

impl NodeProperties for NodeMut<'_> {
    fn property_map(&self) -> &PropertyMap {
        self.properties
    }

    fn presenter(&self) -> &Presenter {
        self.presenter
    }
}

impl fmt::Display for NodeMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_properties(f, self)
    }
}
