//! Sequence extraction from annotated gene-prediction output.
//!
//! Gene predictors such as AUGUSTUS emit one block of commented annotation
//! per predicted gene, terminated by a literal end-of-gene marker. Each block
//! may carry a protein sequence and a coding (nucleotide) sequence as
//! bracketed payloads that span multiple commented lines. This crate turns
//! that text into two FASTA collections, one per sequence kind.
//!
//! The transform is pure: callers read the input file and persist the two
//! outputs themselves.

use serde::{Deserialize, Serialize};

/// Marker terminating one gene block.
pub const GENE_END: &str = "# end gene";

/// Marker introducing a gene block; the identifier token follows it.
pub const GENE_START: &str = "# start gene";

/// Marker opening the protein payload.
pub const PROTEIN_MARKER: &str = "# protein sequence = [";

/// Marker opening the coding-sequence payload.
pub const CODING_MARKER: &str = "# coding sequence = [";

// Stray characters that leak into payloads alongside whitespace: the
// comment prefix on continuation lines and the predictor's padding char.
const STRAY_CHARS: [char; 2] = ['#', '$'];

/// One parsed gene block. Either sequence may be absent independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneRecord {
    pub id: String,
    pub protein: Option<String>,
    pub coding: Option<String>,
}

/// The two serialized FASTA collections produced by [`extract`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub proteins: String,
    pub coding: String,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.proteins.is_empty() && self.coding.is_empty()
    }
}

/// Parse the predictor output into gene records, in block order.
///
/// Blocks without an identifier cannot be attributed to a gene and are
/// dropped, which also disposes of the trailing remainder after the last
/// end-of-gene marker.
pub fn parse_blocks(text: &str) -> Vec<GeneRecord> {
    text.split(GENE_END)
        .filter_map(|block| {
            let id = block_id(block)?;
            Some(GeneRecord {
                id: id.to_string(),
                protein: bracket_payload(block, PROTEIN_MARKER).map(clean_payload),
                coding: bracket_payload(block, CODING_MARKER).map(clean_payload),
            })
        })
        .collect()
}

/// Extract both FASTA collections from the raw predictor output.
///
/// Order is preserved per collection; a record contributes to a collection
/// only when the matching payload marker is present. Duplicate identifiers
/// are kept as-is.
pub fn extract(text: &str) -> Extraction {
    let mut out = Extraction::default();
    for record in parse_blocks(text) {
        if let Some(seq) = &record.protein {
            push_fasta(&mut out.proteins, &record.id, seq);
        }
        if let Some(seq) = &record.coding {
            push_fasta(&mut out.coding, &record.id, seq);
        }
    }
    out
}

/// The identifier token following the start-of-gene marker, if any.
fn block_id(block: &str) -> Option<&str> {
    let rest = &block[block.find(GENE_START)? + GENE_START.len()..];
    rest.split_whitespace().next()
}

/// The raw payload between `marker` and the next closing bracket.
/// An unterminated payload does not match.
fn bracket_payload<'a>(block: &'a str, marker: &str) -> Option<&'a str> {
    let start = block.find(marker)? + marker.len();
    let rest = &block[start..];
    let end = rest.find(']')?;
    Some(&rest[..end])
}

/// Strip whitespace and stray marker characters from a raw payload.
fn clean_payload(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && !STRAY_CHARS.contains(c))
        .collect()
}

fn push_fasta(collection: &mut String, id: &str, seq: &str) {
    collection.push('>');
    collection.push_str(id);
    collection.push('\n');
    collection.push_str(seq);
    collection.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# start gene g1
g1.t1\tAUGUSTUS\tgene\t1\t100\t.\t+\t.\tID=g1
# protein sequence = [MKTA
# YLVR]
# coding sequence = [atgaaa
# acctat]
# end gene
# start gene g2
# protein sequence = [GHQW]
# end gene
# start gene g3
# coding sequence = [ttgacc]
# end gene
# command line was: augustus --species=generic genome.fa
";

    #[test]
    fn test_parse_blocks_in_order() {
        let records = parse_blocks(SAMPLE);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].id, "g1");
        assert_eq!(records[1].id, "g2");
        assert_eq!(records[2].id, "g3");
    }

    #[test]
    fn test_multiline_payload_is_joined() {
        let records = parse_blocks(SAMPLE);
        assert_eq!(records[0].protein.as_deref(), Some("MKTAYLVR"));
        assert_eq!(records[0].coding.as_deref(), Some("atgaaaacctat"));
    }

    #[test]
    fn test_sequence_kinds_are_independent() {
        let records = parse_blocks(SAMPLE);
        // g2 has a protein only, g3 a coding sequence only.
        assert_eq!(records[1].protein.as_deref(), Some("GHQW"));
        assert_eq!(records[1].coding, None);
        assert_eq!(records[2].protein, None);
        assert_eq!(records[2].coding.as_deref(), Some("ttgacc"));
    }

    #[test]
    fn test_extract_collections() {
        let out = extract(SAMPLE);
        assert_eq!(out.proteins, ">g1\nMKTAYLVR\n>g2\nGHQW\n");
        assert_eq!(out.coding, ">g1\natgaaaacctat\n>g3\nttgacc\n");
    }

    #[test]
    fn test_block_without_identifier_is_dropped() {
        let text = "# protein sequence = [MKT]\n# end gene\n";
        assert!(parse_blocks(text).is_empty());
        assert!(extract(text).is_empty());
    }

    #[test]
    fn test_trailing_remainder_is_discarded() {
        // Nothing after the final end-of-gene marker may produce a record.
        let out = extract(SAMPLE);
        assert!(!out.proteins.contains("command line"));
        assert!(!out.coding.contains("command line"));
    }

    #[test]
    fn test_cleaning_removes_whitespace_and_stray_chars() {
        assert_eq!(clean_payload("AB C#D$"), "ABCD");
        assert_eq!(clean_payload("  \n\t "), "");
    }

    #[test]
    fn test_duplicate_identifiers_are_preserved() {
        let text = "\
# start gene g1
# protein sequence = [AAA]
# end gene
# start gene g1
# protein sequence = [CCC]
# end gene
";
        let out = extract(text);
        assert_eq!(out.proteins, ">g1\nAAA\n>g1\nCCC\n");
    }

    #[test]
    fn test_empty_payload_still_emits_header() {
        let text = "# start gene g9\n# protein sequence = [ # ]\n# end gene\n";
        let out = extract(text);
        assert_eq!(out.proteins, ">g9\n\n");
        assert!(out.coding.is_empty());
    }

    #[test]
    fn test_unterminated_payload_does_not_match() {
        let text = "# start gene g1\n# protein sequence = [MKT\n# end gene\n";
        let records = parse_blocks(text);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].protein, None);
    }
}
