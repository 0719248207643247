use crate::domain::payment::Payment;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct PaymentRow<'a> {
    id: String,
    reference: &'a str,
    amount: Decimal,
    currency: &'static str,
    status: &'static str,
    created_at: String,
    updated_at: String,
}

impl<'a> From<&'a Payment> for PaymentRow<'a> {
    fn from(payment: &'a Payment) -> Self {
        Self {
            id: payment.id.to_string(),
            reference: &payment.reference,
            amount: payment.amount.value(),
            currency: payment.currency.code(),
            status: payment.status.as_str(),
            created_at: payment.created_at.to_rfc3339(),
            updated_at: payment.updated_at.to_rfc3339(),
        }
    }
}

/// Writes the final state of payments as CSV
/// (`id,reference,amount,currency,status,created_at,updated_at`).
pub struct PaymentWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> PaymentWriter<W> {
    pub fn new(destination: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(destination),
        }
    }

    pub fn write_payments<'a, I>(&mut self, payments: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Payment>,
    {
        let mut wrote_any = false;
        for payment in payments {
            self.writer.serialize(PaymentRow::from(payment))?;
            wrote_any = true;
        }
        if !wrote_any {
            self.writer.write_record([
                "id",
                "reference",
                "amount",
                "currency",
                "status",
                "created_at",
                "updated_at",
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
