//! The per-request routing hint: what kind of query this is, how fresh the
//! data needs to be, and whether the caller needs to see its own writes.

/// The broad shape of the query being routed, independent of consistency
/// requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Read,
    Write,
    Ddl,
    LongRead,
}

/// How fresh a replica's data needs to be for a read to be routed to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consistency {
    Strong,
    BoundedStaleness,
    Eventual,
}

/// The staleness budget attached to a [`Consistency::BoundedStaleness`]
/// request. `max_lsn_lag == 0` means "don't check LSN lag at all" — only
/// `max_ms` is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct StalenessBudget {
    pub max_ms: u64,
    pub max_lsn_lag: u64,
}

/// A single request's routing requirements, given to [`crate::Router::route`]
/// or [`crate::Router::route_for_tx`].
#[derive(Debug, Clone, Copy)]
pub struct RouteHint {
    pub kind: QueryKind,
    pub consistency: Consistency,
    pub staleness: StalenessBudget,
    pub read_my_writes: bool,
}

impl RouteHint {
    pub fn write() -> Self {
        RouteHint {
            kind: QueryKind::Write,
            consistency: Consistency::Strong,
            staleness: StalenessBudget::default(),
            read_my_writes: false,
        }
    }

    pub fn read() -> Self {
        RouteHint {
            kind: QueryKind::Read,
            consistency: Consistency::Eventual,
            staleness: StalenessBudget::default(),
            read_my_writes: false,
        }
    }

    pub fn bounded_staleness(max_ms: u64) -> Self {
        RouteHint {
            kind: QueryKind::Read,
            consistency: Consistency::BoundedStaleness,
            staleness: StalenessBudget { max_ms, max_lsn_lag: 0 },
            read_my_writes: false,
        }
    }

    pub fn ddl() -> Self {
        RouteHint {
            kind: QueryKind::Ddl,
            consistency: Consistency::Strong,
            staleness: StalenessBudget::default(),
            read_my_writes: false,
        }
    }

    pub fn long_read() -> Self {
        RouteHint {
            kind: QueryKind::LongRead,
            consistency: Consistency::Eventual,
            staleness: StalenessBudget::default(),
            read_my_writes: false,
        }
    }

    pub fn with_read_my_writes(mut self) -> Self {
        self.read_my_writes = true;
        self
    }

    pub fn with_max_lsn_lag(mut self, max_lsn_lag: u64) -> Self {
        self.staleness.max_lsn_lag = max_lsn_lag;
        self
    }

    /// Whether this hint unconditionally forces the primary, independent of
    /// node health (the decision table's first row).
    pub fn forces_primary(&self) -> bool {
        matches!(self.kind, QueryKind::Write | QueryKind::Ddl)
            || self.consistency == Consistency::Strong
            || self.read_my_writes
    }
}
