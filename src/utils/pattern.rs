/// Filename-convention inference for paired-end read files.
///
/// Given the name of a forward (R1) read file, derives the matching reverse
/// (R2) file name and the logical sample id from a closed, ordered set of
/// known naming conventions. The table is data-driven: each rule is a regex
/// plus a replacement template for the reverse name, and the sample id is
/// always the `sample` capture of the same match, so both derivations share
/// one set of segment boundaries.

use lazy_static::lazy_static;
use regex::Regex;

// Optional fastq/fq extension, optionally compressed.
const EXT: &str = r"(?P<ext>(?:\.(?:fastq|fq))?(?:\.(?:gz|bz2))?)";

struct PairRule {
    regex: Regex,
    reverse_template: &'static str,
}

lazy_static! {
    // Ordered, first match wins. Specific lane/chunk shapes come before the
    // bare R1 and numeric fallbacks that would otherwise shadow them.
    static ref PAIR_RULES: Vec<PairRule> = {
        let rules: Vec<(&str, &str)> = vec![
            // sample_L001_R1_001.fastq.gz
            (
                r"^(?P<sample>.*)_(?P<lane>L00[1-9])_R1_(?P<chunk>00[1-9])",
                "${sample}_${lane}_R2_${chunk}${ext}",
            ),
            // sample_L001_<infix>_R1.fastq.gz
            (
                r"^(?P<sample>.*)_(?P<lane>L00[1-9])_(?P<infix>.+)_R1",
                "${sample}_${lane}_${infix}_R2${ext}",
            ),
            // sample_L001_R1.fastq.gz
            (
                r"^(?P<sample>.*)_(?P<lane>L00[1-9])_R1",
                "${sample}_${lane}_R2${ext}",
            ),
            // sample.3_1_suffix.fastq.gz (run digit, then the _1_ mate segment)
            (
                r"^(?P<sample>.*)(?P<delim>[._])(?P<run>[1-9])_1_(?P<suffix>.+?)",
                "${sample}${delim}${run}_2_${suffix}${ext}",
            ),
            // sample.3_1.fastq.gz
            (
                r"^(?P<sample>.*)(?P<delim>[._])(?P<run>[1-9])_1",
                "${sample}${delim}${run}_2${ext}",
            ),
            // sample_R1.fastq.gz / sample.R1.fastq.gz
            (
                r"^(?P<sample>.*)(?P<delim>[._])R1",
                "${sample}${delim}R2${ext}",
            ),
            // sample_1.fastq.gz / sample.1.fastq.gz
            (
                r"^(?P<sample>.*)(?P<delim>[._])1",
                "${sample}${delim}2${ext}",
            ),
        ];
        rules
            .into_iter()
            .map(|(body, reverse_template)| PairRule {
                regex: Regex::new(&format!("{}{}$", body, EXT))
                    .expect("pair rule regexes are static and valid"),
                reverse_template,
            })
            .collect()
    };
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Paired { reverse: String, sample_id: String },
    Unknown,
}

/// Classifies one forward-read file name.
///
/// Returns the derived reverse-read file name and sample id, or `Unknown`
/// when no convention matches. An empty sample id is a valid result; the
/// caller decides how to treat it.
pub fn classify(forward_name: &str) -> Classification {
    for rule in PAIR_RULES.iter() {
        if let Some(caps) = rule.regex.captures(forward_name) {
            let mut reverse = String::new();
            caps.expand(rule.reverse_template, &mut reverse);
            let sample_id = caps
                .name("sample")
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            return Classification::Paired { reverse, sample_id };
        }
    }
    Classification::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paired(name: &str) -> (String, String) {
        match classify(name) {
            Classification::Paired { reverse, sample_id } => (reverse, sample_id),
            Classification::Unknown => panic!("expected {} to classify", name),
        }
    }

    #[test]
    fn test_lane_chunk_shape() {
        let (reverse, sample) = paired("A_L001_R1_001.fastq.gz");
        assert_eq!(reverse, "A_L001_R2_001.fastq.gz");
        assert_eq!(sample, "A");
    }

    #[test]
    fn test_lane_infix_shape() {
        let (reverse, sample) = paired("soil-7_L002_trimmed_R1.fq.bz2");
        assert_eq!(reverse, "soil-7_L002_trimmed_R2.fq.bz2");
        assert_eq!(sample, "soil-7");
    }

    #[test]
    fn test_lane_shape() {
        let (reverse, sample) = paired("B12_L003_R1.fastq");
        assert_eq!(reverse, "B12_L003_R2.fastq");
        assert_eq!(sample, "B12");
    }

    #[test]
    fn test_run_digit_infix_shape() {
        let (reverse, sample) = paired("lake.3_1_filtered.fq.gz");
        assert_eq!(reverse, "lake.3_2_filtered.fq.gz");
        assert_eq!(sample, "lake");
    }

    #[test]
    fn test_run_digit_shape() {
        let (reverse, sample) = paired("pond_4_1.fastq.gz");
        assert_eq!(reverse, "pond_4_2.fastq.gz");
        assert_eq!(sample, "pond");
    }

    #[test]
    fn test_bare_r1_shape() {
        let (reverse, sample) = paired("reef.R1.fastq.gz");
        assert_eq!(reverse, "reef.R2.fastq.gz");
        assert_eq!(sample, "reef");

        let (reverse, sample) = paired("reef_R1");
        assert_eq!(reverse, "reef_R2");
        assert_eq!(sample, "reef");
    }

    #[test]
    fn test_bare_digit_shape() {
        let (reverse, sample) = paired("mud_1.fq");
        assert_eq!(reverse, "mud_2.fq");
        assert_eq!(sample, "mud");
    }

    #[test]
    fn test_specific_rules_win_over_general() {
        // Would also match the bare-lane rule; the chunked rule must win so
        // R2 lands in the chunk segment, not at the end.
        let (reverse, _) = paired("A_L001_R1_002.fastq.gz");
        assert_eq!(reverse, "A_L001_R2_002.fastq.gz");
    }

    #[test]
    fn test_unknown_shapes() {
        assert_eq!(classify("A_L001_R3_001.fastq.gz"), Classification::Unknown);
        assert_eq!(classify("reads.fasta"), Classification::Unknown);
        assert_eq!(classify("sample_R2.fastq.gz"), Classification::Unknown);
        assert_eq!(classify(""), Classification::Unknown);
    }

    #[test]
    fn test_empty_sample_id_is_valid() {
        let (reverse, sample) = paired("_R1.fastq.gz");
        assert_eq!(reverse, "_R2.fastq.gz");
        assert_eq!(sample, "");
    }

    #[test]
    fn test_round_trip() {
        // Swapping R2/_2 back in the derived reverse name must recover the
        // original forward name.
        let cases = [
            ("A_L001_R1_001.fastq.gz", "R2", "R1"),
            ("B12_L003_R1.fastq", "R2", "R1"),
            ("reef.R1.fastq.gz", "R2", "R1"),
            ("pond_4_1.fastq.gz", "4_2", "4_1"),
            ("mud_1.fq", "_2", "_1"),
        ];
        for (forward, rev_tag, fwd_tag) in cases {
            let (reverse, _) = paired(forward);
            assert_eq!(reverse.replacen(rev_tag, fwd_tag, 1), forward);
        }
    }
}
