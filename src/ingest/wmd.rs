//! The typed ten-column CSV schema.
//!
//! Column 0 holds the record tag. Vertex records carry their id in a column
//! that depends on the vertex kind; edge records name their endpoints through
//! the same kind-specific columns. Every edge kind has a fixed inverse that is
//! emitted alongside the forward edge.

use serde::Serialize;
use smallvec::smallvec;

use crate::ingest::{ParsedRecord, RawEdge, RawVertex, RecordParser};
use crate::types::{GraphError, Result, VertexToken};

/// Number of columns in every record.
pub const WMD_FIELD_COUNT: usize = 10;

/// Vertex record tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum WmdVertexKind {
    /// Keyed by field 1.
    Person,
    /// Keyed by field 4.
    ForumEvent,
    /// Keyed by field 3.
    Forum,
    /// Keyed by field 5.
    Publication,
    /// Keyed by field 6.
    Topic,
}

/// Edge record tags; every forward kind has a fixed inverse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum WmdEdgeKind {
    /// Person to person.
    Sale,
    /// Inverse of `Sale`.
    Purchase,
    /// Person to forum, forum event or publication.
    Author,
    /// Inverse of `Author`.
    WrittenBy,
    /// Forum to forum event.
    Includes,
    /// Inverse of `Includes`.
    IncludedIn,
    /// Forum, forum event or publication to topic.
    HasTopic,
    /// Inverse of `HasTopic`.
    TopicIn,
    /// Publication to topic.
    HasOrg,
    /// Inverse of `HasOrg`.
    OrgIn,
}

/// Payload of every edge produced by [`WmdParser`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct WmdEdge {
    /// Relationship kind.
    pub kind: WmdEdgeKind,
    /// Kind of the source vertex.
    pub src_kind: WmdVertexKind,
    /// Kind of the destination vertex.
    pub dst_kind: WmdVertexKind,
}

impl WmdVertexKind {
    fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "Person" => WmdVertexKind::Person,
            "ForumEvent" => WmdVertexKind::ForumEvent,
            "Forum" => WmdVertexKind::Forum,
            "Publication" => WmdVertexKind::Publication,
            "Topic" => WmdVertexKind::Topic,
            _ => return None,
        })
    }

    /// Column holding ids of this kind.
    pub fn id_field(self) -> usize {
        match self {
            WmdVertexKind::Person => 1,
            WmdVertexKind::Forum => 3,
            WmdVertexKind::ForumEvent => 4,
            WmdVertexKind::Publication => 5,
            WmdVertexKind::Topic => 6,
        }
    }
}

impl WmdEdgeKind {
    fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "Sale" => WmdEdgeKind::Sale,
            "Author" => WmdEdgeKind::Author,
            "Includes" => WmdEdgeKind::Includes,
            "HasTopic" => WmdEdgeKind::HasTopic,
            "HasOrg" => WmdEdgeKind::HasOrg,
            _ => return None,
        })
    }

    /// Kind of the edge pointing the other way.
    pub fn inverse(self) -> Self {
        use WmdEdgeKind::*;
        match self {
            Sale => Purchase,
            Purchase => Sale,
            Author => WrittenBy,
            WrittenBy => Author,
            Includes => IncludedIn,
            IncludedIn => Includes,
            HasTopic => TopicIn,
            TopicIn => HasTopic,
            HasOrg => OrgIn,
            OrgIn => HasOrg,
        }
    }
}

impl WmdEdge {
    /// The same relationship seen from the other endpoint.
    pub fn inverse(self) -> Self {
        Self {
            kind: self.kind.inverse(),
            src_kind: self.dst_kind,
            dst_kind: self.src_kind,
        }
    }
}

const ANY_CONTAINER: [WmdVertexKind; 3] = [
    WmdVertexKind::Forum,
    WmdVertexKind::ForumEvent,
    WmdVertexKind::Publication,
];

/// Parser for the typed CSV schema.
#[derive(Clone, Copy, Debug, Default)]
pub struct WmdParser;

impl WmdParser {
    /// Creates the parser.
    pub fn new() -> Self {
        WmdParser
    }
}

impl RecordParser for WmdParser {
    type VertexPayload = WmdVertexKind;
    type EdgePayload = WmdEdge;

    fn parse_line(&self, line: &str) -> Result<ParsedRecord<WmdVertexKind, WmdEdge>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(line.as_bytes());
        let mut record = csv::StringRecord::new();
        let found = reader.read_record(&mut record)?;
        if !found {
            return Ok(ParsedRecord::Skip);
        }
        if record.len() != WMD_FIELD_COUNT {
            return Err(GraphError::MalformedRecord(format!(
                "expected {WMD_FIELD_COUNT} fields, found {}",
                record.len()
            )));
        }
        let fields = Fields(&record);
        let tag = fields.get(0);

        if let Some(kind) = WmdVertexKind::from_tag(tag) {
            let token = fields.id(kind.id_field(), tag)?;
            return Ok(ParsedRecord::Vertex(RawVertex::new(token, Some(kind))));
        }

        let Some(kind) = WmdEdgeKind::from_tag(tag) else {
            return Err(GraphError::UnknownRecordType { tag: tag.to_owned() });
        };
        let ((src, src_kind), (dst, dst_kind)) = match kind {
            WmdEdgeKind::Sale => (
                fields.typed(WmdVertexKind::Person, tag)?,
                (fields.id(2, tag)?, WmdVertexKind::Person),
            ),
            WmdEdgeKind::Author => (
                fields.typed(WmdVertexKind::Person, tag)?,
                fields.first_of(&ANY_CONTAINER, tag)?,
            ),
            WmdEdgeKind::Includes => (
                fields.typed(WmdVertexKind::Forum, tag)?,
                fields.typed(WmdVertexKind::ForumEvent, tag)?,
            ),
            WmdEdgeKind::HasTopic => (
                fields.first_of(&ANY_CONTAINER, tag)?,
                fields.typed(WmdVertexKind::Topic, tag)?,
            ),
            WmdEdgeKind::HasOrg => (
                fields.typed(WmdVertexKind::Publication, tag)?,
                fields.typed(WmdVertexKind::Topic, tag)?,
            ),
            _ => return Err(GraphError::UnknownRecordType { tag: tag.to_owned() }),
        };
        let forward = WmdEdge {
            kind,
            src_kind,
            dst_kind,
        };
        Ok(ParsedRecord::Edges(smallvec![
            RawEdge::new(src, dst, Some(forward)),
            RawEdge::new(dst, src, Some(forward.inverse())),
        ]))
    }
}

struct Fields<'a>(&'a csv::StringRecord);

impl Fields<'_> {
    fn get(&self, idx: usize) -> &str {
        self.0.get(idx).unwrap_or("")
    }

    fn id(&self, idx: usize, tag: &str) -> Result<VertexToken> {
        let raw = self.get(idx);
        raw.parse::<u64>().map(VertexToken).map_err(|_| {
            GraphError::MalformedRecord(format!("{tag}: field {idx} is not an id: {raw:?}"))
        })
    }

    fn typed(&self, kind: WmdVertexKind, tag: &str) -> Result<(VertexToken, WmdVertexKind)> {
        Ok((self.id(kind.id_field(), tag)?, kind))
    }

    fn first_of(
        &self,
        kinds: &[WmdVertexKind],
        tag: &str,
    ) -> Result<(VertexToken, WmdVertexKind)> {
        for &kind in kinds {
            if !self.get(kind.id_field()).is_empty() {
                return self.typed(kind, tag);
            }
        }
        Err(GraphError::MalformedRecord(format!(
            "{tag}: no endpoint in fields 3, 4 or 5"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<ParsedRecord<WmdVertexKind, WmdEdge>> {
        WmdParser::new().parse_line(line)
    }

    fn edges(line: &str) -> Vec<(u64, u64, WmdEdgeKind, WmdVertexKind, WmdVertexKind)> {
        match parse(line).unwrap() {
            ParsedRecord::Edges(edges) => edges
                .into_iter()
                .map(|e| {
                    let p = e.payload.unwrap();
                    (e.src.0, e.dst.0, p.kind, p.src_kind, p.dst_kind)
                })
                .collect(),
            other => panic!("expected edges, got {other:?}"),
        }
    }

    #[test]
    fn vertices_use_kind_specific_columns() {
        let cases = [
            ("Person,11,,,,,,,,", 11, WmdVertexKind::Person),
            ("Forum,,,33,,,,,,", 33, WmdVertexKind::Forum),
            ("ForumEvent,,,,44,,,,,", 44, WmdVertexKind::ForumEvent),
            ("Publication,,,,,55,,,,", 55, WmdVertexKind::Publication),
            ("Topic,,,,,,66,,,", 66, WmdVertexKind::Topic),
        ];
        for (line, id, kind) in cases {
            assert_eq!(
                parse(line).unwrap(),
                ParsedRecord::Vertex(RawVertex::new(id, Some(kind))),
                "{line}"
            );
        }
    }

    #[test]
    fn sale_emits_purchase_inverse() {
        use WmdEdgeKind::*;
        use WmdVertexKind::*;
        assert_eq!(
            edges("Sale,1,2,,,,,1/1/2020,,3"),
            vec![(1, 2, Sale, Person, Person), (2, 1, Purchase, Person, Person)]
        );
    }

    #[test]
    fn author_and_has_topic_pick_first_present_container() {
        use WmdEdgeKind::*;
        use WmdVertexKind::*;
        assert_eq!(
            edges("Author,7,,,,90,,,,"),
            vec![(7, 90, Author, Person, Publication), (90, 7, WrittenBy, Publication, Person)]
        );
        assert_eq!(
            edges("HasTopic,,,,40,,99,,,"),
            vec![(40, 99, HasTopic, ForumEvent, Topic), (99, 40, TopicIn, Topic, ForumEvent)]
        );
        assert_eq!(
            edges("Includes,,,3,4,,,,,"),
            vec![(3, 4, Includes, Forum, ForumEvent), (4, 3, IncludedIn, ForumEvent, Forum)]
        );
        assert_eq!(
            edges("HasOrg,,,,,5,6,,,"),
            vec![(5, 6, HasOrg, Publication, Topic), (6, 5, OrgIn, Topic, Publication)]
        );
    }

    #[test]
    fn unknown_tags_and_bad_shapes_are_record_errors() {
        let err = parse("Spaceship,1,,,,,,,,").unwrap_err();
        assert!(matches!(&err, GraphError::UnknownRecordType { tag } if tag == "Spaceship"));
        assert!(err.is_record_level());

        assert!(matches!(parse("Person,1,,"), Err(GraphError::MalformedRecord(_))));
        assert!(matches!(parse("Person,x,,,,,,,,"), Err(GraphError::MalformedRecord(_))));
        assert!(matches!(parse("Author,1,,,,,,,,"), Err(GraphError::MalformedRecord(_))));
    }

    #[test]
    fn inverse_is_an_involution() {
        let edge = WmdEdge {
            kind: WmdEdgeKind::Author,
            src_kind: WmdVertexKind::Person,
            dst_kind: WmdVertexKind::Forum,
        };
        assert_eq!(edge.inverse().inverse(), edge);
    }
}
