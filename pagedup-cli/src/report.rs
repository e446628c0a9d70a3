//! Plain-text result tables, one `Type, Count1, Count2` row per line.

use std::fmt::Display;

use pagedup::{
    aggregate::{ExactStats, FlagCounts, PatchStats},
    flags::VMA_FLAGS,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("division by zero in row `{row}`")]
    DivisionByZero { row: &'static str },
}

const HEADER: &str = "Type, Count1, Count2\n";

fn row(out: &mut String, name: &str, first: impl Display, second: impl Display) {
    out.push_str(&format!("{name}, {first}, {second}\n"));
}

fn ratio(row: &'static str, part: u64, whole: u64) -> Result<String, ReportError> {
    if whole == 0 {
        return Err(ReportError::DivisionByZero { row });
    }
    Ok(format!("{:.2}", part as f64 / whole as f64))
}

pub fn exact_table(stats: &ExactStats) -> Result<String, ReportError> {
    let (a, b) = (&stats.first, &stats.second);
    let (total_a, total_b) = (a.total(), b.total());

    const COMMON_HASHES: &str = "Common Hashes Percent";
    const COMMON_CHUNKS: &str = "Common Chunks Percent";
    let mut out = String::from(HEADER);
    row(
        &mut out,
        COMMON_HASHES,
        ratio(COMMON_HASHES, a.common.fingerprints, total_a.fingerprints)?,
        ratio(COMMON_HASHES, b.common.fingerprints, total_b.fingerprints)?,
    );
    row(
        &mut out,
        "Distinct Hashes",
        a.distinct.fingerprints,
        b.distinct.fingerprints,
    );
    row(
        &mut out,
        "Total Hashes",
        total_a.fingerprints,
        total_b.fingerprints,
    );
    row(
        &mut out,
        COMMON_CHUNKS,
        ratio(COMMON_CHUNKS, a.common.occurrences, total_a.occurrences)?,
        ratio(COMMON_CHUNKS, b.common.occurrences, total_b.occurrences)?,
    );
    row(
        &mut out,
        "Distinct Chunks",
        a.distinct.occurrences,
        b.distinct.occurrences,
    );
    row(
        &mut out,
        "Total Chunks",
        total_a.occurrences,
        total_b.occurrences,
    );
    Ok(out)
}

/// `Total` followed by every known VMA flag, zero when never seen.
pub fn flag_table(first: &FlagCounts, second: &FlagCounts) -> String {
    let mut out = String::from(HEADER);
    row(&mut out, "Total", first.total, second.total);
    for flag in VMA_FLAGS {
        row(&mut out, flag.name, first.bit(flag.bit), second.bit(flag.bit));
    }
    out
}

pub fn patch_table(stats: &PatchStats) -> String {
    let mut out = String::from("Type, Count\n");
    let mut line = |name: &str, value: u64| out.push_str(&format!("{name}, {value}\n"));
    line("Pages", stats.pages);
    line("Patched Pages", stats.patched_pages);
    line("Raw Length", stats.raw_length);
    line("Dedup Length", stats.patched_length);
    line("Patch Length", stats.patch_length);
    if let Some(len) = stats.recompressed_patch_length {
        line("Recompressed Patch Length", len);
    }
    out
}

#[cfg(test)]
mod tests {
    use pagedup::aggregate::{SideStats, Tally};

    use super::*;

    fn side(common: (u64, u64), distinct: (u64, u64)) -> SideStats {
        SideStats {
            common: Tally {
                fingerprints: common.0,
                occurrences: common.1,
            },
            distinct: Tally {
                fingerprints: distinct.0,
                occurrences: distinct.1,
            },
        }
    }

    #[test]
    fn exact_table_rows() {
        let stats = ExactStats {
            first: side((1, 3), (1, 1)),
            second: side((1, 2), (3, 6)),
        };
        let table = exact_table(&stats).unwrap();
        assert_eq!(
            table,
            "Type, Count1, Count2\n\
             Common Hashes Percent, 0.50, 0.25\n\
             Distinct Hashes, 1, 3\n\
             Total Hashes, 2, 4\n\
             Common Chunks Percent, 0.75, 0.25\n\
             Distinct Chunks, 1, 6\n\
             Total Chunks, 4, 8\n"
        );
    }

    #[test]
    fn empty_dump_is_a_division_by_zero() {
        let stats = ExactStats {
            first: side((0, 0), (0, 0)),
            second: side((0, 0), (2, 2)),
        };
        assert!(matches!(
            exact_table(&stats),
            Err(ReportError::DivisionByZero {
                row: "Common Hashes Percent"
            })
        ));
    }

    #[test]
    fn flag_table_lists_every_flag() {
        let mut first = FlagCounts {
            total: 4,
            ..Default::default()
        };
        first.bits.insert(5, 3);
        let second = FlagCounts::default();
        let table = flag_table(&first, &second);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2 + VMA_FLAGS.len());
        assert_eq!(lines[1], "Total, 4, 0");
        assert!(lines.contains(&"VMA_AREA_HEAP, 3, 0"));
        assert!(lines.contains(&"VMA_UNSUPP, 0, 0"));
    }

    #[test]
    fn patch_table_names_lengths() {
        let stats = PatchStats {
            pages: 2,
            patched_pages: 1,
            raw_length: 8192,
            patched_length: 4100,
            patch_length: 4,
            recompressed_patch_length: None,
        };
        let table = patch_table(&stats);
        assert!(table.contains("Dedup Length, 4100\n"));
        assert!(!table.contains("Recompressed"));
    }
}
