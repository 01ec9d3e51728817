//! # PLY Loader
//!
//! Parses the ASCII PLY dialect the models ship in: a `vertex` element whose
//! first three float properties are the position (any further float
//! properties are skipped by count), and a `face` element declared as
//! `property list uchar int vertex_indices` (or the `uint` variant) holding
//! triangles only.
//!
//! The parser is line-oriented and strict: the header must declare exactly
//! this shape, every vertex line must carry as many floats as were declared,
//! every face must have three indices, and every index must be below the
//! vertex count. Anything else is a [`PlyError`] with the offending line.

use std::io::BufRead;

use glam::Vec3;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlyError {
    #[error("i/o error reading model: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: expected `{expected}`")]
    Header { line: usize, expected: &'static str },

    #[error("line {line}: malformed {element} row")]
    BadRow { line: usize, element: &'static str },

    #[error("line {line}: face index {index} out of range (vertex count {count})")]
    BadIndex { line: usize, index: u32, count: usize },

    #[error("model ends before {element} element is complete")]
    Truncated { element: &'static str },

    #[error("model declares no {0}")]
    Empty(&'static str),
}

/// A parsed model: positions and triangle index triples, nothing more.
#[derive(Debug, Clone)]
pub struct PlyMesh {
    pub positions: Vec<Vec3>,
    pub faces: Vec<[u32; 3]>,
}

/// Reads non-empty lines one at a time, tracking the line number for errors.
struct Lines<R> {
    reader: R,
    buf: String,
    line: usize,
}

impl<R: BufRead> Lines<R> {
    fn new(reader: R) -> Self {
        Self { reader, buf: String::new(), line: 0 }
    }

    /// Next non-blank line, trimmed. `None` at end of input.
    fn next(&mut self) -> Result<Option<&str>, PlyError> {
        loop {
            self.buf.clear();
            self.line += 1;
            if self.reader.read_line(&mut self.buf)? == 0 {
                return Ok(None);
            }
            if !self.buf.trim().is_empty() {
                break;
            }
        }
        Ok(Some(self.buf.trim()))
    }
}

/// Parse a model from any buffered reader.
pub fn parse<R: BufRead>(reader: R) -> Result<PlyMesh, PlyError> {
    let mut lines = Lines::new(reader);
    let (vtx_count, prop_count, face_count) = parse_header(&mut lines)?;

    let mut positions = Vec::with_capacity(vtx_count);
    for _ in 0..vtx_count {
        let line = lines.line + 1;
        let row = lines
            .next()?
            .ok_or(PlyError::Truncated { element: "vertex" })?;
        let mut floats = row.split_ascii_whitespace().map(str::parse::<f32>);
        let mut pos = [0.0f32; 3];
        for slot in &mut pos {
            *slot = floats
                .next()
                .and_then(Result::ok)
                .ok_or(PlyError::BadRow { line, element: "vertex" })?;
        }
        // The remaining declared properties must be present and numeric,
        // but their values are dropped.
        let mut extra = 0;
        for value in floats {
            value.map_err(|_| PlyError::BadRow { line, element: "vertex" })?;
            extra += 1;
        }
        if extra != prop_count - 3 {
            return Err(PlyError::BadRow { line, element: "vertex" });
        }
        positions.push(Vec3::from_array(pos));
    }

    let mut faces = Vec::with_capacity(face_count);
    for _ in 0..face_count {
        let line = lines.line + 1;
        let row = lines
            .next()?
            .ok_or(PlyError::Truncated { element: "face" })?;
        let mut ints = row.split_ascii_whitespace().map(str::parse::<u32>);
        let mut next = |element| {
            ints.next()
                .and_then(Result::ok)
                .ok_or(PlyError::BadRow { line, element })
        };
        if next("face")? != 3 {
            return Err(PlyError::BadRow { line, element: "face" });
        }
        let tri = [next("face")?, next("face")?, next("face")?];
        for &index in &tri {
            if index as usize >= positions.len() {
                return Err(PlyError::BadIndex { line, index, count: positions.len() });
            }
        }
        faces.push(tri);
    }

    Ok(PlyMesh { positions, faces })
}

/// Returns `(vertex count, float properties per vertex, face count)`.
fn parse_header<R: BufRead>(lines: &mut Lines<R>) -> Result<(usize, usize, usize), PlyError> {
    expect(lines, "ply")?;
    expect(lines, "format ascii 1.0")?;

    let vtx_count = {
        let (line, row) = next_meaningful(lines, "element vertex")?;
        parse_count(&row, "element vertex")
            .ok_or(PlyError::Header { line, expected: "element vertex <count>" })?
    };
    if vtx_count == 0 {
        return Err(PlyError::Empty("vertices"));
    }

    // x, y, z, then any number of skipped extras.
    for axis in ["property float x", "property float y", "property float z"] {
        expect(lines, axis)?;
    }
    let mut prop_count = 3;
    let face_count = loop {
        let (line, row) = next_meaningful(lines, "property or element face")?;
        if row.starts_with("property float ") {
            prop_count += 1;
            continue;
        }
        let count = parse_count(&row, "element face")
            .ok_or(PlyError::Header { line, expected: "element face <count>" })?;
        break count;
    };
    if face_count == 0 {
        return Err(PlyError::Empty("faces"));
    }

    {
        let (line, row) = next_meaningful(lines, "face list property")?;
        let tokens: Vec<&str> = row.split_ascii_whitespace().collect();
        if !matches!(
            tokens.as_slice(),
            ["property", "list", "uchar", "int" | "uint", "vertex_indices"],
        ) {
            return Err(PlyError::Header {
                line,
                expected: "property list uchar int vertex_indices",
            });
        }
    }
    expect(lines, "end_header")?;

    Ok((vtx_count, prop_count, face_count))
}

/// Next line that isn't a comment, together with its line number.
fn next_meaningful<R: BufRead>(
    lines: &mut Lines<R>,
    expected: &'static str,
) -> Result<(usize, String), PlyError> {
    loop {
        let line = lines.line + 1;
        match lines.next()? {
            None => return Err(PlyError::Header { line, expected }),
            Some(row) if row.starts_with("comment") => continue,
            Some(row) => return Ok((line, row.to_owned())),
        }
    }
}

fn expect<R: BufRead>(lines: &mut Lines<R>, expected: &'static str) -> Result<(), PlyError> {
    let (line, row) = next_meaningful(lines, expected)?;
    if row.split_ascii_whitespace().eq(expected.split_ascii_whitespace()) {
        Ok(())
    } else {
        Err(PlyError::Header { line, expected })
    }
}

/// Parse `"element <kind> <count>"`, returning the count.
fn parse_count(row: &str, prefix: &str) -> Option<usize> {
    row.strip_prefix(prefix)?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(text: &str) -> Result<PlyMesh, PlyError> {
        parse(text.as_bytes())
    }

    const QUAD: &str = "\
ply
format ascii 1.0
comment two triangles sharing an edge
element vertex 4
property float x
property float y
property float z
element face 2
property list uchar int vertex_indices
end_header
0 0 0
1 0 0
1 1 0
0 1 0
3 0 1 2
3 0 2 3
";

    #[test]
    fn parses_a_shared_edge_quad() {
        let mesh = parse_str(QUAD).unwrap();
        assert_eq!(mesh.positions.len(), 4);
        assert_eq!(mesh.faces, vec![[0, 1, 2], [0, 2, 3]]);
    }

    #[test]
    fn extra_vertex_properties_are_skipped() {
        let text = "\
ply
format ascii 1.0
element vertex 3
property float x
property float y
property float z
property float confidence
property float intensity
element face 1
property list uchar uint vertex_indices
end_header
0 0 0 0.5 0.1
1 0 0 0.5 0.2
0 1 0 0.5 0.3
3 0 1 2
";
        let mesh = parse_str(text).unwrap();
        assert_eq!(mesh.positions[2], Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(mesh.faces.len(), 1);
    }

    #[test]
    fn missing_extra_property_is_an_error() {
        let text = "\
ply
format ascii 1.0
element vertex 1
property float x
property float y
property float z
property float confidence
element face 1
property list uchar int vertex_indices
end_header
0 0 0
3 0 0 0
";
        assert!(matches!(
            parse_str(text),
            Err(PlyError::BadRow { element: "vertex", .. })
        ));
    }

    #[test]
    fn out_of_range_index_fails_the_load() {
        let text = "\
ply
format ascii 1.0
element vertex 3
property float x
property float y
property float z
element face 1
property list uchar int vertex_indices
end_header
0 0 0
1 0 0
0 1 0
3 0 1 3
";
        assert!(matches!(
            parse_str(text),
            Err(PlyError::BadIndex { index: 3, count: 3, .. })
        ));
    }

    #[test]
    fn non_triangle_faces_are_rejected() {
        let text = QUAD.replace("3 0 1 2", "4 0 1 2 3");
        assert!(matches!(
            parse_str(&text),
            Err(PlyError::BadRow { element: "face", .. })
        ));
    }

    #[test]
    fn truncated_body_is_reported() {
        let truncated = &QUAD[..QUAD.len() - 8];
        assert!(matches!(
            parse_str(truncated),
            Err(PlyError::Truncated { element: "face" })
        ));
    }

    #[test]
    fn wrong_header_is_rejected_with_line_number() {
        let text = "ply\nformat binary_little_endian 1.0\n";
        match parse_str(text) {
            Err(PlyError::Header { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected header error, got {other:?}"),
        }
    }
}
