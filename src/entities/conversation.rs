// 💬 Conversation Entity - chat thread that can turn into an order
//
// A conversation collects messages and a cart. Confirming it creates a
// sales invoice and links it back via `order_transaction_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    #[default]
    Open,
    Ordered,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Open => "open",
            ConversationStatus::Ordered => "ordered",
            ConversationStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(ConversationStatus::Open),
            "ordered" => Some(ConversationStatus::Ordered),
            "closed" => Some(ConversationStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    Customer,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: i64,
    pub quantity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(default)]
    pub id: i64,
    pub business_id: i64,
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub cart: Vec<CartLine>,
    #[serde(default)]
    pub status: ConversationStatus,
    #[serde(default)]
    pub order_transaction_id: Option<i64>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(business_id: i64, customer_name: &str) -> Self {
        let now = Utc::now();
        Conversation {
            id: 0,
            business_id,
            customer_name: customer_name.to_string(),
            messages: Vec::new(),
            cart: Vec::new(),
            status: ConversationStatus::Open,
            order_transaction_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == ConversationStatus::Open
    }

    /// Merge into an existing cart line for the same product
    pub fn add_to_cart(&mut self, product_id: i64, quantity: f64) {
        match self.cart.iter_mut().find(|l| l.product_id == product_id) {
            Some(line) => line.quantity += quantity,
            None => self.cart.push(CartLine {
                product_id,
                quantity,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cart_merges_same_product() {
        let mut c = Conversation::new(1, "Ana");
        c.add_to_cart(5, 2.0);
        c.add_to_cart(6, 1.0);
        c.add_to_cart(5, 3.0);

        assert_eq!(c.cart.len(), 2);
        assert_eq!(c.cart[0].quantity, 5.0);
        assert!(c.is_open());
    }
}
