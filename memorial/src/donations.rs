//! Donation intents. Completion is self-reported by the donor after the
//! out-of-band transfer; nothing here verifies a payment.

use crate::auth::Access;
use crate::config::PaymentNumbers;
use crate::error::{GatewayError, MemorialError, Result};
use crate::model::{Donation, DonationStatus, PaymentMethod};
use crate::store::Records;
use rand::Rng;
use serde::Serialize;

const REFERENCE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const REFERENCE_LEN: usize = 6;
const MAX_REFERENCE_ATTEMPTS: usize = 3;

pub fn reference_code() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..REFERENCE_LEN)
        .map(|_| REFERENCE_ALPHABET[rng.gen_range(0..REFERENCE_ALPHABET.len())] as char)
        .collect();
    format!("MEM-{}", suffix)
}

/// What the donor needs to complete a transfer.
#[derive(Debug, Clone, Serialize)]
pub struct DonationIntent {
    pub donation: Donation,
    /// Receiving number for mobile-money methods.
    pub pay_to: Option<String>,
    pub instructions: String,
}

#[derive(Clone)]
pub struct DonationDesk {
    records: Records,
    numbers: PaymentNumbers,
}

impl DonationDesk {
    pub fn new(records: Records, numbers: PaymentNumbers) -> Self {
        Self { records, numbers }
    }

    pub async fn start(
        &self,
        amount: u64,
        donor_name: Option<&str>,
        method: PaymentMethod,
    ) -> Result<DonationIntent> {
        if amount == 0 {
            return Err(MemorialError::validation("please enter a valid amount"));
        }
        let donor = donor_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or("Anonymous");
        let status = if method.is_mobile_money() {
            DonationStatus::Pending
        } else {
            DonationStatus::Initiated
        };

        let mut attempt = 0;
        let donation = loop {
            attempt += 1;
            let reference = reference_code();
            match self
                .records
                .insert_donation(amount, donor, &reference, method, status)
                .await
            {
                Ok(d) => break d,
                Err(GatewayError::Rejected { status: 409, .. }) | Err(GatewayError::Conflict(_))
                    if attempt < MAX_REFERENCE_ATTEMPTS =>
                {
                    tracing::debug!(reference = %reference, "reference collision, retrying");
                }
                Err(e) => {
                    tracing::error!(error = %e, "recording donation failed");
                    return Err(e.into());
                }
            }
        };

        let pay_to = self.numbers.for_method(method).map(str::to_string);
        let instructions = match &pay_to {
            Some(number) => format!(
                "Send {} to {} via {} and use {} as the reference.",
                amount,
                number,
                method.as_str(),
                donation.payment_id
            ),
            None => format!(
                "Complete the card payment and quote {} if you contact the family.",
                donation.payment_id
            ),
        };
        tracing::info!(reference = %donation.payment_id, method = method.as_str(), "donation started");
        Ok(DonationIntent {
            donation,
            pay_to,
            instructions,
        })
    }

    /// Mark a donation completed. Confirming twice is harmless.
    pub async fn confirm(&self, reference: &str) -> Result<Donation> {
        let reference = reference.trim().to_ascii_uppercase();
        let mut donation = self
            .records
            .find_donation(&reference)
            .await?
            .ok_or_else(|| MemorialError::NotFound(format!("donation {}", reference)))?;
        if donation.payment_status != DonationStatus::Completed {
            self.records
                .set_donation_status(&reference, DonationStatus::Completed)
                .await?;
            donation.payment_status = DonationStatus::Completed;
            tracing::info!(reference = %reference, "donation confirmed");
        }
        Ok(donation)
    }

    /// Moderator only.
    pub async fn list(&self, access: &Access) -> Result<Vec<Donation>> {
        access.require_moderator()?;
        Ok(self.records.list_donations().await?)
    }
}
