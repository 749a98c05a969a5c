//! Critical / non-critical classification of syntax-check findings.
//!
//! Most findings reported by the syntax checker alter how the file would be
//! processed downstream (duplicated or unsorted records, identical
//! reference and alternate alleles) and are critical. A small, explicit
//! whitelist of cardinality and type mismatches on optional annotation
//! fields is tolerated. Anything not on the whitelist is critical.

use std::sync::OnceLock;

use regex::Regex;

const NON_CRITICAL_FORMAT_FIELDS: &[&str] = &["PL", "AD", "AC", "GQ"];
const NON_CRITICAL_INFO_FIELDS: &[&str] = &["AC"];

struct AllowRule {
    pattern: Regex,
    /// fields the rule tolerates; `None` means the pattern alone suffices
    fields: Option<&'static [&'static str]>,
}

fn allow_rules() -> &'static [AllowRule] {
    static RULES: OnceLock<Vec<AllowRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        let rule = |pattern: &str, fields| AllowRule {
            // patterns are fixed at compile time, a failure here is a bug
            pattern: Regex::new(pattern).unwrap(),
            fields,
        };
        vec![
            rule(
                r"^INFO (?P<field>\w+) does not match the specification Number",
                Some(NON_CRITICAL_INFO_FIELDS),
            ),
            rule(
                r"^INFO (?P<field>\w+) metadata Number is not ",
                Some(NON_CRITICAL_INFO_FIELDS),
            ),
            rule(
                r"^(Line \d+: )?Sample #\d+, field (?P<field>\w+) does not match the meta specification Number=",
                Some(NON_CRITICAL_FORMAT_FIELDS),
            ),
            rule(
                r"^(Line \d+: )?FORMAT (?P<field>\w+) metadata Type is not ",
                Some(NON_CRITICAL_FORMAT_FIELDS),
            ),
            rule(
                r"^(Line \d+: )?FORMAT (?P<field>\w+) metadata Number is not ",
                Some(NON_CRITICAL_FORMAT_FIELDS),
            ),
            rule(
                r#"^(Line \d+: )?INFO SVLEN must be equal to "length of ALT - length of REF" for non-symbolic alternate alleles\. SVLEN="#,
                None,
            ),
        ]
    })
}

/// Whether a syntax-check finding is critical for downstream processing.
pub fn is_critical(finding: &str) -> bool {
    for rule in allow_rules() {
        if let Some(captures) = rule.pattern.captures(finding) {
            match rule.fields {
                None => return false,
                Some(fields) => {
                    if captures
                        .name("field")
                        .map_or(false, |field| fields.contains(&field.as_str()))
                    {
                        return false;
                    }
                }
            }
        }
    }
    true
}
