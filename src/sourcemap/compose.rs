//! Two-stage source map composition

use super::vlq::{self, Lines, MappingsError, OriginalPosition, Segment};
use super::SourceMap;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Combine the transformer's map with the instrumenter's map
///
/// - no instrumentation: the transformer map passes through unchanged
/// - instrumentation only: the instrumentation map, with the original
///   source embedded so it is self-contained
/// - both: a composed map from the original source to the final output
pub fn compose(
    transformer: Option<&SourceMap>,
    instrumentation: Option<&SourceMap>,
    original_source: &str,
    path: &Path,
) -> Option<SourceMap> {
    match (transformer, instrumentation) {
        (None, None) => None,
        (Some(map), None) => Some(map.clone()),
        (None, Some(map)) => Some(self_contained(map, original_source, path)),
        (Some(upstream), Some(downstream)) => match compose_maps(upstream, downstream) {
            Ok(mut composed) => {
                composed.embed_single_source(original_source);
                Some(composed)
            }
            Err(e) => {
                warn!(
                    "Could not compose source maps for {}: {}; using the coverage map only",
                    path.display(),
                    e
                );
                Some(self_contained(downstream, original_source, path))
            }
        },
    }
}

fn self_contained(map: &SourceMap, original_source: &str, path: &Path) -> SourceMap {
    let mut map = map.clone();
    if map.sources.is_empty() {
        map.sources.push(path.display().to_string());
    }
    map.embed_single_source(original_source);
    map
}

/// Compose `upstream` (original → intermediate) with `downstream`
/// (intermediate → final) into original → final.
///
/// Every downstream segment is traced through the upstream map using the
/// closest upstream segment at or before its column on the same
/// intermediate line. Segments that land nowhere in the original are
/// dropped.
pub fn compose_maps(
    upstream: &SourceMap,
    downstream: &SourceMap,
) -> Result<SourceMap, MappingsError> {
    let up_lines = upstream.decoded_mappings()?;
    let down_lines = downstream.decoded_mappings()?;

    let mut names = NameTable::new(&upstream.names);
    let mut composed: Lines = Vec::with_capacity(down_lines.len());

    for down_line in &down_lines {
        let mut segments = Vec::with_capacity(down_line.len());

        for segment in down_line {
            let Some(intermediate) = segment.original else {
                continue;
            };
            let Some(original) = lookup(&up_lines, intermediate.line, intermediate.column) else {
                continue;
            };

            let name = original.name.or_else(|| {
                intermediate
                    .name
                    .and_then(|n| downstream.names.get(n as usize))
                    .map(|n| names.index_of(n))
            });

            segments.push(Segment::new(
                segment.generated_column,
                Some(OriginalPosition { name, ..original }),
            ));
        }

        composed.push(segments);
    }

    Ok(SourceMap {
        version: 3,
        file: downstream.file.clone().or_else(|| upstream.file.clone()),
        source_root: upstream.source_root.clone(),
        sources: upstream.sources.clone(),
        sources_content: upstream.sources_content.clone(),
        names: names.into_names(),
        mappings: vlq::encode(&composed),
        extra: serde_json::Map::new(),
    })
}

/// Greatest-lower-bound lookup of a generated position in decoded mappings
fn lookup(lines: &Lines, line: u32, column: u32) -> Option<OriginalPosition> {
    let segments = lines.get(line as usize)?;
    let after = segments.partition_point(|s| s.generated_column <= column);
    segments.get(after.checked_sub(1)?)?.original
}

/// Names of the composed map: upstream names first, then any downstream
/// names that had to be carried over.
struct NameTable {
    names: Vec<String>,
    index: HashMap<String, u32>,
}

impl NameTable {
    fn new(seed: &[String]) -> Self {
        let mut table = Self {
            names: Vec::with_capacity(seed.len()),
            index: HashMap::new(),
        };
        for name in seed {
            table.names.push(name.clone());
            table
                .index
                .entry(name.clone())
                .or_insert(table.names.len() as u32 - 1);
        }
        table
    }

    fn index_of(&mut self, name: &str) -> u32 {
        if let Some(&i) = self.index.get(name) {
            return i;
        }
        let i = self.names.len() as u32;
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), i);
        i
    }

    fn into_names(self) -> Vec<String> {
        self.names
    }
}
