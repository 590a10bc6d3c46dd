use smallvec::smallvec;

use crate::ingest::{ParsedRecord, RawEdge, RecordParser};
use crate::types::Result;

/// Plain `"<src> <dst>"` edge lists over the vertex domain `[0, num_vertices)`.
///
/// Numbers are decimal and may contain `_` separators. Anything after the
/// destination is ignored. Lines whose endpoints are missing, unparsable or
/// outside the domain are skipped rather than rejected.
#[derive(Clone, Copy, Debug)]
pub struct EdgeListParser {
    num_vertices: u64,
}

impl EdgeListParser {
    /// Parser for the vertex domain `[0, num_vertices)`.
    pub fn new(num_vertices: u64) -> Self {
        Self { num_vertices }
    }

    /// Size of the vertex domain.
    pub fn num_vertices(&self) -> u64 {
        self.num_vertices
    }
}

impl RecordParser for EdgeListParser {
    type VertexPayload = ();
    type EdgePayload = ();

    fn parse_line(&self, line: &str) -> Result<ParsedRecord<(), ()>> {
        let mut rest = line.as_bytes();
        let (Some(src), Some(dst)) = (next_number(&mut rest), next_number(&mut rest)) else {
            return Ok(ParsedRecord::Skip);
        };
        if src >= self.num_vertices || dst >= self.num_vertices {
            return Ok(ParsedRecord::Skip);
        }
        Ok(ParsedRecord::Edges(smallvec![RawEdge::new(src, dst, None)]))
    }

    fn vertex_domain(&self) -> Option<u64> {
        Some(self.num_vertices)
    }
}

/// Reads one unsigned number after optional whitespace, advancing `rest` past it.
fn next_number(rest: &mut &[u8]) -> Option<u64> {
    let start = rest.iter().position(|b| !b.is_ascii_whitespace())?;
    let mut value: u64 = 0;
    let mut digits = 0usize;
    let mut idx = start;
    while let Some(&b) = rest.get(idx) {
        match b {
            b'0'..=b'9' => {
                value = value.checked_mul(10)?.checked_add(u64::from(b - b'0'))?;
                digits += 1;
            }
            b'_' => {}
            _ => break,
        }
        idx += 1;
    }
    *rest = &rest[idx..];
    (digits > 0).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(parser: &EdgeListParser, line: &str) -> Option<(u64, u64)> {
        match parser.parse_line(line).unwrap() {
            ParsedRecord::Edges(edges) => {
                assert_eq!(edges.len(), 1);
                Some((edges[0].src.0, edges[0].dst.0))
            }
            ParsedRecord::Skip => None,
            ParsedRecord::Vertex(_) => panic!("edge lists have no vertex records"),
        }
    }

    #[test]
    fn parses_plain_and_underscored_numbers() {
        let parser = EdgeListParser::new(2_000_000);
        assert_eq!(edge(&parser, "1 2"), Some((1, 2)));
        assert_eq!(edge(&parser, "  1_000\t\t2_0  "), Some((1000, 20)));
        assert_eq!(edge(&parser, "3 4 0.5"), Some((3, 4)));
    }

    #[test]
    fn skips_out_of_domain_and_garbage() {
        let parser = EdgeListParser::new(10);
        assert_eq!(edge(&parser, "9 10"), None);
        assert_eq!(edge(&parser, "1"), None);
        assert_eq!(edge(&parser, "a b"), None);
        assert_eq!(edge(&parser, "99999999999999999999999 1"), None);
        assert_eq!(edge(&parser, "_ 1"), None);
    }

    #[test]
    fn declares_vertex_domain() {
        assert_eq!(EdgeListParser::new(7).vertex_domain(), Some(7));
    }
}
