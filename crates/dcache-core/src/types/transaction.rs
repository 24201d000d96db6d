//! Buffered write transactions
//!
//! A [`Transaction`] records writes on physical keys. The backend applies the
//! whole buffer atomically (MULTI/EXEC on redis, a database transaction on
//! SQL). Reads are not part of the unit: a pipelined store cannot answer them
//! before the unit commits.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOp {
    Set {
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
    },
    Delete {
        key: String,
    },
    SetMapField {
        key: String,
        field: String,
        value: String,
    },
    DeleteMapField {
        key: String,
        field: String,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
    Increase {
        key: String,
    },
    Publish {
        channel: String,
        message: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    ops: Vec<TxOp>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> &mut Self {
        self.push(TxOp::Set {
            key: key.into(),
            value,
            ttl,
        })
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(TxOp::Delete { key: key.into() })
    }

    pub fn set_map_field(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.push(TxOp::SetMapField {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        })
    }

    pub fn delete_map_field(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
    ) -> &mut Self {
        self.push(TxOp::DeleteMapField {
            key: key.into(),
            field: field.into(),
        })
    }

    pub fn expire(&mut self, key: impl Into<String>, ttl: Duration) -> &mut Self {
        self.push(TxOp::Expire { key: key.into(), ttl })
    }

    pub fn increase(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(TxOp::Increase { key: key.into() })
    }

    pub fn publish(&mut self, channel: impl Into<String>, message: impl Into<String>) -> &mut Self {
        self.push(TxOp::Publish {
            channel: channel.into(),
            message: message.into(),
        })
    }

    pub fn push(&mut self, op: TxOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn ops(&self) -> &[TxOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<TxOp> {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_in_order() {
        let mut tx = Transaction::new();
        tx.set("a", b"1".to_vec(), None)
            .increase("n")
            .publish("c", "hello");

        assert_eq!(tx.len(), 3);
        assert_eq!(
            tx.ops()[1],
            TxOp::Increase {
                key: "n".to_string()
            }
        );
        assert!(matches!(tx.into_ops().last(), Some(TxOp::Publish { .. })));
    }
}
