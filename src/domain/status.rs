//! Order lifecycle stages

use serde::{Deserialize, Serialize};

/// Lifecycle stage of a shipped order
///
/// Forward order: `OrderPlaced < Processing < Packaging < OnTheRoad < Delivered`.
/// `Cancelled` sits outside that chain and is reachable from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    OrderPlaced,
    Processing,
    Packaging,
    OnTheRoad,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// All stages, forward chain first
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::OrderPlaced,
        OrderStatus::Processing,
        OrderStatus::Packaging,
        OrderStatus::OnTheRoad,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::OrderPlaced => "ORDER_PLACED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Packaging => "PACKAGING",
            OrderStatus::OnTheRoad => "ON_THE_ROAD",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    /// Position in the forward chain. `None` for `Cancelled`.
    #[inline]
    pub fn rank(&self) -> Option<u8> {
        match self {
            OrderStatus::OrderPlaced => Some(0),
            OrderStatus::Processing => Some(1),
            OrderStatus::Packaging => Some(2),
            OrderStatus::OnTheRoad => Some(3),
            OrderStatus::Delivered => Some(4),
            OrderStatus::Cancelled => None,
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Whether moving from `self` to `next` is a legal forward transition
    ///
    /// Terminal stages accept nothing. `Cancelled` is accepted from any
    /// non-terminal stage. Otherwise `next` must rank strictly higher.
    pub fn can_advance_to(&self, next: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(current), Some(candidate)) => candidate > current,
            (None, Some(_)) => false,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown order status: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_chain_ranks_ascend() {
        let ranks: Vec<u8> = OrderStatus::ALL.iter().filter_map(|s| s.rank()).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_can_advance_forward_only() {
        assert!(OrderStatus::Processing.can_advance_to(OrderStatus::Packaging));
        assert!(OrderStatus::Processing.can_advance_to(OrderStatus::Delivered));
        assert!(!OrderStatus::Packaging.can_advance_to(OrderStatus::Processing));
        assert!(!OrderStatus::Packaging.can_advance_to(OrderStatus::Packaging));
    }

    #[test]
    fn test_cancel_from_any_non_terminal() {
        for status in OrderStatus::ALL.iter().filter(|s| !s.is_terminal()) {
            assert!(status.can_advance_to(OrderStatus::Cancelled), "{status}");
        }
        assert!(!OrderStatus::Delivered.can_advance_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Cancelled.can_advance_to(OrderStatus::Delivered));
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let json = serde_json::to_string(&OrderStatus::OnTheRoad).unwrap();
        assert_eq!(json, "\"ON_THE_ROAD\"");
        let parsed: OrderStatus = serde_json::from_str("\"ORDER_PLACED\"").unwrap();
        assert_eq!(parsed, OrderStatus::OrderPlaced);
        assert_eq!("delivered".parse::<OrderStatus>().unwrap(), OrderStatus::Delivered);
        assert!("LOST".parse::<OrderStatus>().is_err());
    }
}
