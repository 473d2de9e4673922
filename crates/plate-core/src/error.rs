use crate::document::NodeKey;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditorError {
    #[error("mutation attempted outside of an update transaction")]
    NoActiveTransaction,
    #[error("an update transaction is already open")]
    TransactionInProgress,
    #[error("selection references {key}, which is no longer in the document")]
    InvalidSelection { key: NodeKey },
    #[error("{key} is not in the document")]
    UnknownNode { key: NodeKey },
    #[error("the editor is read-only")]
    ReadOnly,
    #[error("{0}")]
    InvalidNode(String),
}
