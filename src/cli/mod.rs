pub mod args;

pub use args::Arguments;
use clap::Parser;

pub fn parse() -> Arguments {
    Arguments::parse()
}
