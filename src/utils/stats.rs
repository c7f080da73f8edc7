/// Parsing of `bcftools stats` text output.
use std::fmt;


/// Counts scraped from the `SN` (summary numbers) block. A field is `None`
/// when its line is absent or its value is not a number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VariantSummary {
    pub records: Option<u64>,
    pub snps: Option<u64>,
    pub indels: Option<u64>,
}

/// Renders a scraped count, or an explicit marker when it was absent.
pub struct Count(pub Option<u64>);

impl fmt::Display for Count {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(n) => write!(f, "{}", n),
            None => write!(f, "not found"),
        }
    }
}

/// Splits an `SN` line into its key and value:
/// `SN\t0\tnumber of records:\t1234` -> (`number of records`, `1234`).
fn parse_sn_line(line: &str) -> Option<(&str, &str)> {
    let mut fields = line.split('\t');
    if fields.next()? != "SN" {
        return None;
    }
    let _id = fields.next()?;
    let key = fields.next()?.trim().trim_end_matches(':');
    let value = fields.next()?.trim();
    Some((key, value))
}

pub fn parse_summary(text: &str) -> VariantSummary {
    let mut summary = VariantSummary::default();
    for line in text.lines() {
        let Some((key, value)) = parse_sn_line(line) else {
            continue;
        };
        let parsed = value.parse::<u64>().ok();
        match key {
            "number of records" => summary.records = parsed,
            "number of SNPs" => summary.snps = parsed,
            "number of indels" => summary.indels = parsed,
            _ => {}
        }
    }
    summary
}

/// First `limit` summary (`SN`) lines, verbatim.
pub fn summary_lines(text: &str, limit: usize) -> Vec<&str> {
    text.lines()
        .filter(|line| line.starts_with("SN"))
        .take(limit)
        .collect()
}
