//! Wire messages of the point-fetch exchange.

use crate::types::{PointId, Rank};
use serde::{Deserialize, Serialize};

/// A point-fetch request, sent outbox → inbox.
///
/// Transient: exists only for the duration of one request/reply round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// The rank asking for the point.
    pub requesting_rank: Rank,
    /// The requested point, in the owner's id space.
    pub point_id: PointId,
}

impl FetchRequest {
    /// Create a request.
    #[must_use]
    pub fn new(requesting_rank: Rank, point_id: PointId) -> Self {
        Self {
            requesting_rank,
            point_id,
        }
    }
}

/// The acknowledgment sent inbox → outbox once a point is staged.
///
/// Deliberately small: it signals "the reply is ready for aliasing", it does
/// not carry the point values themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckToken {
    /// The point the acknowledgment is for.
    pub point_id: PointId,
}

impl AckToken {
    /// Create a token.
    #[must_use]
    pub fn new(point_id: PointId) -> Self {
        Self { point_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrip() {
        let request = FetchRequest::new(Rank::new(2), PointId::new(7));
        let json = serde_json::to_vec(&request).unwrap();
        let back: FetchRequest = serde_json::from_slice(&json).unwrap();
        assert_eq!(request, back);
    }

    #[test]
    fn token_roundtrip() {
        let token = AckToken::new(PointId::new(7));
        let json = serde_json::to_vec(&token).unwrap();
        let back: AckToken = serde_json::from_slice(&json).unwrap();
        assert_eq!(token, back);
    }
}
