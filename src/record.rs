//! Currency records and their external representations.
//!
//! A [`Record`] is immutable once built. Records reach the store either from
//! the CSV data file at startup or from a successful `Ingest` call, and the
//! two paths validate differently: CSV rows are taken as-is (an unparsable
//! number becomes zero), while ingested records must have every field set.

use std::io::Read;
use std::path::Path;

use crate::proto;
use crate::{Error, Result};

/// A single currency entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Record {
    country: String,
    name: String,
    code: String,
    number: i32,
}

impl Record {
    /// Creates a record without validation.
    pub fn new(
        country: impl Into<String>,
        name: impl Into<String>,
        code: impl Into<String>,
        number: i32,
    ) -> Self {
        Self {
            country: country.into(),
            name: name.into(),
            code: code.into(),
            number,
        }
    }

    /// Country or territory using the currency.
    pub fn country(&self) -> &str {
        &self.country
    }

    /// Display name of the currency.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Alphabetic ISO code, e.g. `HTG`.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Numeric ISO code, e.g. `332`.
    pub fn number(&self) -> i32 {
        self.number
    }

    /// Checks that every field is populated.
    pub fn validate(&self) -> Result<()> {
        let missing = [
            ("country", self.country.is_empty()),
            ("name", self.name.is_empty()),
            ("code", self.code.is_empty()),
            ("number", self.number == 0),
        ]
        .into_iter()
        .filter_map(|(field, empty)| empty.then_some(field))
        .collect::<Vec<_>>();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidRecord(format!(
                "must provide country, name, code and number (missing: {})",
                missing.join(", ")
            )))
        }
    }

    /// Returns true if the record matches either key of the lookup.
    ///
    /// An empty code or a zero number does not take part in the match.
    pub fn matches(&self, code: &str, number: i32) -> bool {
        (!code.is_empty() && self.code == code) || (number != 0 && self.number == number)
    }
}

impl From<Record> for proto::Record {
    fn from(record: Record) -> Self {
        Self {
            country: record.country,
            name: record.name,
            code: record.code,
            number: record.number,
        }
    }
}

impl TryFrom<proto::Record> for Record {
    type Error = Error;

    fn try_from(message: proto::Record) -> Result<Self> {
        let record = Record::new(message.country, message.name, message.code, message.number);
        record.validate()?;
        Ok(record)
    }
}

/// Rejects lookup requests that identify neither a code nor a number.
pub fn validate_lookup(request: &proto::LookupRequest) -> Result<()> {
    if request.code.is_empty() && request.number == 0 {
        return Err(Error::InvalidRequest(
            "must provide currency number or code".to_string(),
        ));
    }
    Ok(())
}

/// Reads `country,name,code,number` rows from CSV data without a header.
///
/// Quoted fields may contain commas. A number column that does not parse as
/// an integer yields zero.
pub fn read_csv<R: Read>(reader: R) -> Result<Vec<Record>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut records = Vec::new();
    for row in csv_reader.records() {
        let row = row?;
        if row.len() < 4 {
            let line = row.position().map(|p| p.line()).unwrap_or_default();
            return Err(Error::MalformedRow {
                line,
                found: row.len(),
            });
        }

        let number = row[3].parse::<i32>().unwrap_or(0);
        records.push(Record::new(&row[0], &row[1], &row[2], number));
    }

    Ok(records)
}

/// Reads a CSV data file from disk.
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Record>> {
    let file = std::fs::File::open(path.as_ref())?;
    read_csv(std::io::BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn haiti() -> Record {
        Record::new("HAITI", "Gourde", "HTG", 332)
    }

    #[test]
    fn complete_record_validates() {
        assert!(haiti().validate().is_ok());
    }

    #[test]
    fn record_with_empty_name_is_rejected() {
        let record = Record::new("HAITI", "", "HTG", 332);
        let err = record.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidRecord(_)));
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn record_with_zero_number_is_rejected() {
        let message = proto::Record {
            country: "HAITI".to_string(),
            name: "Gourde".to_string(),
            code: "HTG".to_string(),
            number: 0,
        };
        assert!(Record::try_from(message).is_err());
    }

    #[test]
    fn matches_on_either_key() {
        let record = haiti();
        assert!(record.matches("HTG", 0));
        assert!(record.matches("", 332));
        assert!(record.matches("ZZZ", 332));
        assert!(record.matches("HTG", 999));
        assert!(!record.matches("ZZZ", 999));
    }

    #[test]
    fn unset_keys_never_match() {
        let unnumbered = Record::new("ANTARCTICA", "No universal currency", "", 0);
        assert!(!unnumbered.matches("", 0));
        assert!(!unnumbered.matches("USD", 0));
        assert!(!unnumbered.matches("", 840));
    }

    #[test]
    fn lookup_without_keys_is_invalid() {
        let request = proto::LookupRequest {
            code: String::new(),
            number: 0,
        };
        assert!(matches!(
            validate_lookup(&request),
            Err(Error::InvalidRequest(_))
        ));

        let request = proto::LookupRequest {
            code: String::new(),
            number: 192,
        };
        assert!(validate_lookup(&request).is_ok());
    }

    #[test]
    fn csv_rows_become_records() {
        let data = "HAITI,Gourde,HTG,332\n\"BOLIVIA, PLURINATIONAL STATE OF\",Mvdol,BOV,984\n";
        let records = read_csv(data.as_bytes()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0], haiti());
        assert_eq!(records[1].country(), "BOLIVIA, PLURINATIONAL STATE OF");
        assert_eq!(records[1].number(), 984);
    }

    #[test]
    fn unparsable_number_defaults_to_zero() {
        let data = "ANTARCTICA,No universal currency,,\nPALESTINE,No universal currency,,n/a\n";
        let records = read_csv(data.as_bytes()).unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.number() == 0));
    }

    #[test]
    fn short_row_is_a_load_error() {
        let data = "HAITI,Gourde,HTG,332\nCUBA,Cuban Peso\n";
        let err = read_csv(data.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::MalformedRow { line: 2, found: 2 }));
    }

    #[test]
    fn proto_round_trip_keeps_fields() {
        let message = proto::Record::from(haiti());
        assert_eq!(message.code, "HTG");
        assert_eq!(Record::try_from(message).unwrap(), haiti());
    }
}
