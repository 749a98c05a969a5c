//! Convert metadata findings from JSON-document coordinates back to the
//! spreadsheet coordinates the submitter actually edited.
//!
//! The conversion reverses a declarative property-to-sheet/column mapping.
//! Findings that cannot be mapped (unknown attributes, schema-internal
//! messages) are dropped from the spreadsheet view only; the raw view keeps
//! them.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::results::parsers::MetadataFinding;

#[derive(Debug, Deserialize)]
pub struct SpreadsheetConf {
    /// sheet name -> top-level JSON attribute
    worksheets: BTreeMap<String, String>,
    sheets: BTreeMap<String, SheetConf>,
}

#[derive(Debug, Default, Deserialize)]
struct SheetConf {
    #[serde(default)]
    header_row: Option<u32>,
    #[serde(default)]
    required: BTreeMap<String, String>,
    #[serde(default)]
    optional: BTreeMap<String, String>,
}

impl SpreadsheetConf {
    /// The mapping shipped with the tool, matching the current spreadsheet
    /// template.
    pub fn embedded() -> &'static SpreadsheetConf {
        static CONF: OnceLock<SpreadsheetConf> = OnceLock::new();
        CONF.get_or_init(|| {
            static RAW: &str =
                include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/spreadsheet2json.yaml"));
            serde_yaml::from_str(RAW).expect("embedded spreadsheet mapping is valid")
        })
    }

    fn sheet_for_attribute(&self, json_attribute: &str) -> Option<&str> {
        self.worksheets
            .iter()
            .find(|(_, attribute)| attribute.as_str() == json_attribute)
            .map(|(sheet, _)| sheet.as_str())
    }

    fn column_for_attribute(&self, sheet: &str, json_attribute: &str) -> Option<&str> {
        let conf = self.sheets.get(sheet)?;
        conf.required
            .iter()
            .chain(conf.optional.iter())
            .find(|(_, attribute)| attribute.as_str() == json_attribute)
            .map(|(column, _)| column.as_str())
    }

    fn row_number(&self, sheet: &str, json_index: u32) -> u32 {
        // data starts on the row after the headers; JSON indexes from zero
        let header_row = self
            .sheets
            .get(sheet)
            .and_then(|conf| conf.header_row)
            .unwrap_or(2);
        json_index + header_row
    }
}

/// One metadata finding in spreadsheet coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpreadsheetFinding {
    pub sheet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<u32>,
    pub column: String,
    pub description: String,
}

/// Split a finding's property path into (top-level attribute, array index,
/// leaf attribute). BioSample objects nest deeper than the rest of the
/// document and get their own patterns.
fn parse_metadata_property(property: &str) -> Option<(String, Option<u32>, Option<String>)> {
    if let Some(stripped) = property.strip_prefix('.') {
        return Some((stripped.trim_matches('/').to_string(), None, None));
    }

    static BIOSAMPLE_CHARACTERISTIC: OnceLock<Regex> = OnceLock::new();
    let characteristic = BIOSAMPLE_CHARACTERISTIC.get_or_init(|| {
        Regex::new(r"^/sample/(\d+)/bioSampleObject/characteristics/(\w+)").unwrap()
    });
    if let Some(captures) = characteristic.captures(property) {
        return Some((
            "sample".to_string(),
            captures[1].parse().ok(),
            Some(captures[2].to_string()),
        ));
    }

    static BIOSAMPLE_NAME: OnceLock<Regex> = OnceLock::new();
    let name = BIOSAMPLE_NAME
        .get_or_init(|| Regex::new(r"^/sample/(\d+)/bioSampleObject/name").unwrap());
    if let Some(captures) = name.captures(property) {
        return Some((
            "sample".to_string(),
            captures[1].parse().ok(),
            Some("name".to_string()),
        ));
    }

    static GENERIC: OnceLock<Regex> = OnceLock::new();
    let generic = GENERIC
        .get_or_init(|| Regex::new(r"^/(\w+)(/(\d+))?([./](\w+))?").unwrap());
    let captures = generic.captures(property)?;
    Some((
        captures[1].to_string(),
        captures.get(3).and_then(|index| index.as_str().parse().ok()),
        captures.get(5).map(|attribute| attribute.as_str().to_string()),
    ))
}

/// Convert the raw findings into the spreadsheet view.
pub fn convert_findings(
    findings: &[MetadataFinding],
    conf: &SpreadsheetConf,
) -> Vec<SpreadsheetFinding> {
    let mut converted = Vec::new();
    for finding in findings {
        let Some((json_sheet, json_row, json_attribute)) =
            parse_metadata_property(&finding.property)
        else {
            log::warn!("Cannot parse metadata property {}", finding.property);
            continue;
        };
        let Some(sheet) = conf.sheet_for_attribute(&json_sheet) else {
            continue;
        };
        let column = match &json_attribute {
            None => String::new(),
            // an attribute we know nothing about (likely a nested
            // bioSampleObject detail): spreadsheet view drops it
            Some(attribute) => match conf.column_for_attribute(sheet, attribute) {
                Some(column) => column.to_string(),
                None => continue,
            },
        };
        let row = json_row.map(|index| conf.row_number(sheet, index));

        let description = match (row, &json_attribute) {
            (None, None) => format!("Sheet \"{sheet}\" is missing"),
            (None, Some(_)) => {
                format!("In sheet \"{sheet}\", column \"{column}\" is not populated")
            }
            (Some(row), Some(_)) => {
                format!("In sheet \"{sheet}\", row \"{row}\", column \"{column}\" is not populated")
            }
            (Some(_), None) => finding.description.replace(&json_sheet, sheet),
        };
        if description.contains("schema") {
            // schema-internal message, meaningless in spreadsheet terms
            continue;
        }
        converted.push(SpreadsheetFinding {
            sheet: sheet.to_string(),
            row,
            column,
            description,
        });
    }
    converted
}
