use rand::rngs::ThreadRng;
use rand::seq::IndexedRandom;
use rand::rng;
use rand_distr::{Normal, Distribution};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DNA {
    A,
    C,
    G,
    T,
}

impl DNA {
    pub fn to_char(&self) -> char {
        match self {
            DNA::A => 'A',
            DNA::C => 'C',
            DNA::G => 'G',
            DNA::T => 'T',
        }
    }

    pub fn all() -> &'static [DNA] {
        &[DNA::A, DNA::C, DNA::G, DNA::T]
    }

    /// Generate a random sequence of nucleotides of the given length.
    pub fn random_sequence(length: usize) -> String {
        let mut rng = rng();
        (0..length)
            .map(|_| DNA::random_with_rng(&mut rng).to_char())
            .collect()
    }

    fn random_with_rng(rng: &mut ThreadRng) -> DNA {
        *DNA::all()
            .choose(rng)
            .expect("DNA::all is never empty")
    }
}

/// Complement of one IUPAC nucleotide code, case preserved for ACGTU.
/// Unrecognized bytes pass through unchanged.
fn complement(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'T' | b'U' => b'A',
        b'C' => b'G',
        b'G' => b'C',
        b'a' => b't',
        b't' | b'u' => b'a',
        b'c' => b'g',
        b'g' => b'c',
        // IUPAC ambiguity codes
        b'R' => b'Y',
        b'Y' => b'R',
        b'S' => b'S',
        b'W' => b'W',
        b'K' => b'M',
        b'M' => b'K',
        b'B' => b'V',
        b'V' => b'B',
        b'D' => b'H',
        b'H' => b'D',
        b'N' => b'N',
        b'r' => b'y',
        b'y' => b'r',
        b's' => b's',
        b'w' => b'w',
        b'k' => b'm',
        b'm' => b'k',
        b'b' => b'v',
        b'v' => b'b',
        b'd' => b'h',
        b'h' => b'd',
        b'n' => b'n',
        other => other,
    }
}

/// Reverse complement of a primer or read, IUPAC-aware. Used to derive the
/// anti-sense search pattern for the reverse primer.
pub fn reverse_complement(seq: &str) -> String {
    seq.bytes().rev().map(|b| complement(b) as char).collect()
}

fn phred33(score: u8) -> u8 {
    score + 33
}

fn normal_phred_qual(mean: f32, stdev: f32) -> u8 {
    let mut raw_phred = -1.0;

    let normal = Normal::new(mean, stdev).unwrap();

    while raw_phred < 0.0 || raw_phred > 40.0 {
        raw_phred = normal.sample(&mut rand::rng());
    }

    phred33(raw_phred as u8)
}

/// Random phred-33 quality string, used when fabricating FASTQ test inputs.
pub fn normal_phred_qual_string(length: usize, mean: f32, stdev: f32) -> String {
    let mut quals = String::new();

    for _i in 0..length {
        quals.push(normal_phred_qual(mean, stdev) as char);
    }

    quals
}
