use crate::record::ResourceRecord;

/// HTTP-level outcome of a store mutation or read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Created,
    Ok,
    NoContent,
}

impl OutcomeStatus {
    pub fn http(&self) -> u16 {
        match self {
            Self::Created => 201,
            Self::Ok => 200,
            Self::NoContent => 204,
        }
    }
}

/// A completed store operation: the record it settled on plus how to
/// report it.
#[derive(Debug, Clone)]
pub struct StoreOutcome {
    pub record: ResourceRecord,
    pub status: OutcomeStatus,
}

impl StoreOutcome {
    pub fn created(record: ResourceRecord) -> Self {
        Self {
            record,
            status: OutcomeStatus::Created,
        }
    }

    pub fn ok(record: ResourceRecord) -> Self {
        Self {
            record,
            status: OutcomeStatus::Ok,
        }
    }

    pub fn no_content(record: ResourceRecord) -> Self {
        Self {
            record,
            status: OutcomeStatus::NoContent,
        }
    }
}
