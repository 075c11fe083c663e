//! Post owner transfer requests.

use crate::error::Result;
use crate::posts::types::{Address, EntityKey, EntityKind, FieldError};
use serde::{Deserialize, Serialize};

/// A pending request to hand the ownership of a post to another user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostOwnerTransferRequest {
    pub subspace_id: u64,
    pub post_id: u64,
    /// Current owner of the post.
    pub sender: Address,
    pub receiver: Address,
}

impl PostOwnerTransferRequest {
    pub fn new(subspace_id: u64, post_id: u64, sender: Address, receiver: Address) -> Self {
        Self {
            subspace_id,
            post_id,
            sender,
            receiver,
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::post(self.subspace_id, self.post_id)
    }

    pub fn validate(&self) -> Result<()> {
        self.check_fields()
            .map_err(|e| e.into_error(EntityKind::TransferRequest, self.key()))
    }

    fn check_fields(&self) -> std::result::Result<(), FieldError> {
        if self.subspace_id == 0 {
            return Err(FieldError::new("subspace_id", "invalid subspace id: 0"));
        }
        if self.post_id == 0 {
            return Err(FieldError::new("post_id", "invalid post id: 0"));
        }
        self.sender
            .validate()
            .map_err(|e| FieldError::new("sender", format!("invalid sender address: {}", e)))?;
        self.receiver
            .validate()
            .map_err(|e| FieldError::new("receiver", format!("invalid receiver address: {}", e)))?;
        if self.sender == self.receiver {
            return Err(FieldError::new(
                "receiver",
                "receiver cannot be the same as the sender",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(n: u8) -> Address {
        Address::encode("cosmos", &[n; 20]).unwrap()
    }

    #[test]
    fn test_transfer_request_validation() {
        assert!(PostOwnerTransferRequest::new(1, 1, address(1), address(2))
            .validate()
            .is_ok());
        assert!(PostOwnerTransferRequest::new(0, 1, address(1), address(2))
            .validate()
            .is_err());
        assert!(PostOwnerTransferRequest::new(1, 0, address(1), address(2))
            .validate()
            .is_err());
        assert!(PostOwnerTransferRequest::new(1, 1, address(1), address(1))
            .validate()
            .is_err());
        assert!(PostOwnerTransferRequest::new(1, 1, Address::new("x"), address(1))
            .validate()
            .is_err());
    }
}
