use serde::{Deserialize, Serialize};

/// Server-assigned record identifier.
pub type RecordId = i64;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Tribute {
    pub id: RecordId,
    pub author_name: String,
    pub message: String,
    /// Public URL of the attached image, empty when there is none.
    #[serde(rename = "imageUrl", default)]
    pub image_url: String,
    pub created_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: RecordId,
    pub tribute_id: RecordId,
    pub author_name: String,
    pub message: String,
    pub created_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ImageGroup {
    pub id: RecordId,
    pub name: String,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct GalleryImage {
    /// Object name within its bucket, including any group folder.
    pub name: String,
    pub bucket: String,
    pub url: String,
    pub fallback_url: &'static str,
    pub caption: Option<String>,
    pub group: Option<String>,
    /// Milliseconds encoded in the object name, 0 when absent.
    pub created_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Mtn,
    Telecel,
    #[serde(rename = "airteltigo")]
    AirtelTigo,
    Stripe,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Mtn => "mtn",
            PaymentMethod::Telecel => "telecel",
            PaymentMethod::AirtelTigo => "airteltigo",
            PaymentMethod::Stripe => "stripe",
        }
    }

    pub fn is_mobile_money(&self) -> bool {
        !matches!(self, PaymentMethod::Stripe)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DonationStatus {
    Pending,
    Initiated,
    Completed,
}

impl DonationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DonationStatus::Pending => "pending",
            DonationStatus::Initiated => "initiated",
            DonationStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Donation {
    pub id: RecordId,
    pub amount: u64,
    pub donor_name: String,
    pub payment_status: DonationStatus,
    /// Human readable reference the donor quotes with the transfer.
    pub payment_id: String,
    pub payment_method: PaymentMethod,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tribute_wire_names() {
        let t = Tribute {
            id: 1,
            author_name: "Ada".into(),
            message: "Rest well".into(),
            image_url: String::new(),
            created_at: 5,
        };
        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v["imageUrl"], "");
        let back: Tribute = serde_json::from_value(serde_json::json!({
            "id": 2, "author_name": "B", "message": "m", "created_at": 1
        }))
        .unwrap();
        assert_eq!(back.image_url, "");
    }

    #[test]
    fn payment_method_tags() {
        let m: PaymentMethod = serde_json::from_str("\"airteltigo\"").unwrap();
        assert_eq!(m, PaymentMethod::AirtelTigo);
        assert_eq!(m.as_str(), "airteltigo");
        assert!(!PaymentMethod::Stripe.is_mobile_money());
    }
}
