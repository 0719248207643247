use crate::domain::payment::PaymentRequest;
use crate::error::{PaymentError, Result};
use std::io::Read;

/// Reads payment creation requests from a CSV source with an
/// `amount,currency,reference` header.
///
/// Fields are trimmed and short or long records are tolerated; a record that
/// does not deserialize yields an error and the iterator moves on.
pub struct PaymentRequestReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> PaymentRequestReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes requests in file order.
    pub fn requests(self) -> impl Iterator<Item = Result<PaymentRequest>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reader_valid_stream() {
        let data = "amount, currency, reference\n100.50, USD, inv-1\n 20 ,ETB,inv-2";
        let reader = PaymentRequestReader::new(data.as_bytes());
        let results: Vec<Result<PaymentRequest>> = reader.requests().collect();

        assert_eq!(results.len(), 2);
        let first = results[0].as_ref().unwrap();
        assert_eq!(first.amount, dec!(100.50));
        assert_eq!(first.currency, "USD");
        assert_eq!(first.reference, "inv-1");
        assert_eq!(results[1].as_ref().unwrap().currency, "ETB");
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "amount,currency,reference\nlots,USD,inv-1\n5,USD,inv-2";
        let reader = PaymentRequestReader::new(data.as_bytes());
        let results: Vec<Result<PaymentRequest>> = reader.requests().collect();

        assert!(matches!(results[0], Err(PaymentError::Csv(_))));
        assert!(results[1].is_ok());
    }

    #[test]
    fn test_validation_happens_later() {
        let data = "amount,currency,reference\n-5,EUR,inv-1";
        let reader = PaymentRequestReader::new(data.as_bytes());
        let request = reader.requests().next().unwrap().unwrap();

        assert!(request.validate().is_err());
    }
}
