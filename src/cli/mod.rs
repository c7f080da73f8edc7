pub mod args;

use clap::Parser;
pub use args::{Arguments, Mode};

pub fn parse() -> Arguments {
    Arguments::parse()
}
