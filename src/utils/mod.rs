pub mod command;
pub mod file;
pub mod logger;
pub mod stats;
pub mod vcf;
