pub mod vcf_processing;
pub mod report;
