//src/hits.rs

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use log::debug;

use crate::config::AlignerKind;
use crate::error::{PlacementError, Result};
use crate::types::AlignmentHit;

// outfmt 6 column positions
const QSEQID: usize = 0;
const SSEQID: usize = 1;
const PIDENT: usize = 2;
const EVALUE: usize = 10;
const BITSCORE: usize = 11;

impl AlignerKind {
    /// Normalise a subject id as this aligner prints it.
    ///
    /// BLAST decorates ids from databases built with `-parse_seqids`
    /// (`lcl|X`, `gnl|db|X`, `ref|X|`); the accession is the last non-empty
    /// `|` field. DIAMOND prints the FASTA id verbatim.
    pub fn subject_id<'a>(&self, raw: &'a str) -> &'a str {
        match self {
            AlignerKind::Diamond => raw,
            AlignerKind::Blast => raw
                .rsplit('|')
                .find(|part| !part.is_empty())
                .unwrap_or(raw),
        }
    }

    /// Parse one tabular line. `Ok(None)` for blank and comment lines.
    pub fn parse_hit_line(&self, line: &str) -> std::result::Result<Option<AlignmentHit>, String> {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() <= EVALUE {
            return Err(format!(
                "expected at least {} tab-separated columns, found {}",
                EVALUE + 1,
                fields.len()
            ));
        }

        let percent_identity: f64 = fields[PIDENT]
            .trim()
            .parse()
            .map_err(|_| format!("invalid percent identity '{}'", fields[PIDENT]))?;
        if !(0.0..=100.0).contains(&percent_identity) {
            return Err(format!("percent identity {} is outside 0-100", percent_identity));
        }

        let e_value: f64 = fields[EVALUE]
            .trim()
            .parse()
            .map_err(|_| format!("invalid e-value '{}'", fields[EVALUE]))?;
        if !(e_value >= 0.0) {
            return Err(format!("e-value {} is negative", e_value));
        }

        let bit_score = match fields.get(BITSCORE).map(|s| s.trim()) {
            Some(s) if !s.is_empty() => {
                let score = s
                    .parse::<f64>()
                    .map_err(|_| format!("invalid bit score '{}'", s))?;
                if !score.is_finite() {
                    return Err(format!("bit score '{}' is not finite", s));
                }
                Some(score)
            }
            _ => None,
        };

        let query_id = fields[QSEQID].trim();
        let reference_id = self.subject_id(fields[SSEQID].trim());
        if query_id.is_empty() || reference_id.is_empty() {
            return Err("empty query or subject id".to_string());
        }

        Ok(Some(AlignmentHit {
            query_id: query_id.to_string(),
            reference_id: reference_id.to_string(),
            percent_identity,
            e_value,
            bit_score,
        }))
    }
}

/// Reads a tabular (outfmt 6) hit table, transparently decompressing `.gz`.
pub fn read_hit_table<P: AsRef<Path>>(path: P, aligner: AlignerKind) -> Result<Vec<AlignmentHit>> {
    let path = path.as_ref();
    let f = File::open(path).map_err(|e| PlacementError::io(path, e))?;

    let is_gz = path
        .extension()
        .map(|ext| ext == "gz")
        .unwrap_or(false);

    let reader: Box<dyn BufRead> = if is_gz {
        Box::new(BufReader::new(MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    };

    let mut hits = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| PlacementError::io(path, e))?;
        match aligner.parse_hit_line(&line) {
            Ok(Some(hit)) => hits.push(hit),
            Ok(None) => {}
            Err(detail) => {
                return Err(PlacementError::MalformedHit {
                    path: path.to_path_buf(),
                    line: line_no + 1,
                    detail,
                })
            }
        }
    }

    debug!("Read {} {} hits from {}", hits.len(), aligner, path.display());
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const LINES: &str = "\
# BLASTP 2.12.0+
q1\trefA\t98.5\t120\t2\t0\t1\t120\t5\t124\t1e-50\t230.1
q1\trefB\t91.0\t118\t10\t1\t1\t118\t3\t120\t3.2e-30\t180
q2\trefC\t45.0\t60\t33\t2\t10\t70\t1\t60\t0.001\t40.2

";

    #[test]
    fn test_parse_diamond_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s1.diamond.out");
        std::fs::write(&path, LINES).unwrap();

        let hits = read_hit_table(&path, AlignerKind::Diamond).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].query_id, "q1");
        assert_eq!(hits[0].reference_id, "refA");
        assert_eq!(hits[0].percent_identity, 98.5);
        assert_eq!(hits[0].e_value, 1e-50);
        assert_eq!(hits[0].bit_score, Some(230.1));
        assert_eq!(hits[2].e_value, 0.001);
    }

    #[test]
    fn test_parse_gzipped_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s1.diamond.out.gz");
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(LINES.as_bytes()).unwrap();
        std::fs::write(&path, enc.finish().unwrap()).unwrap();

        let hits = read_hit_table(&path, AlignerKind::Diamond).unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_blast_subject_ids() {
        let blast = AlignerKind::Blast;
        assert_eq!(blast.subject_id("lcl|MMETSP0001_1"), "MMETSP0001_1");
        assert_eq!(blast.subject_id("gnl|BL_ORD_ID|42"), "42");
        assert_eq!(blast.subject_id("ref|XP_0001.1|"), "XP_0001.1");
        assert_eq!(blast.subject_id("plain"), "plain");
        assert_eq!(AlignerKind::Diamond.subject_id("lcl|X"), "lcl|X");
    }

    #[test]
    fn test_short_bitscore_column_is_optional() {
        let hit = AlignerKind::Diamond
            .parse_hit_line("q\tr\t80\t1\t1\t1\t1\t1\t1\t1\t1e-5")
            .unwrap()
            .unwrap();
        assert_eq!(hit.bit_score, None);
    }

    #[test]
    fn test_malformed_lines() {
        let d = AlignerKind::Diamond;
        assert!(d.parse_hit_line("q\tr\t98").is_err());
        assert!(d.parse_hit_line("q\tr\tabc\t1\t1\t1\t1\t1\t1\t1\t1e-5\t1").is_err());
        assert!(d.parse_hit_line("q\tr\t101\t1\t1\t1\t1\t1\t1\t1\t1e-5\t1").is_err());
        assert!(d.parse_hit_line("q\tr\t90\t1\t1\t1\t1\t1\t1\t1\t-1\t1").is_err());
        assert!(d.parse_hit_line("\tr\t90\t1\t1\t1\t1\t1\t1\t1\t1\t1").is_err());
        assert!(d.parse_hit_line("q\tr\t90\t1\t1\t1\t1\t1\t1\t1\t1e-5\tinf").is_err());
        assert!(d.parse_hit_line("q\tr\t90\t1\t1\t1\t1\t1\t1\t1\t1e-5\tNaN").is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.out");
        std::fs::write(&path, "q1\trefA\t98\t1\t1\t1\t1\t1\t1\t1\t1e-5\t1\nbroken line\n").unwrap();
        match read_hit_table(&path, d) {
            Err(PlacementError::MalformedHit { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected MalformedHit, got {:?}", other.map(|h| h.len())),
        }
    }
}
