//! The four-slot path lattice: `{main, back-up} x {primary, secondary}`,
//! each cell an optional configured destination with observable status.

use crate::transport::TransportKind;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Branch {
    Main,
    BackUp,
}

impl Branch {
    pub const ALL: [Branch; 2] = [Branch::Main, Branch::BackUp];

    /// The `zone` value a state-change message carries: 1 for main, 2 for back-up.
    pub fn as_zone(self) -> u8 {
        match self {
            Branch::Main => 1,
            Branch::BackUp => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Primary,
    Secondary,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::Primary, Slot::Secondary];
}

/// A configured destination. `offset` is the learned clock skew against the
/// receiver, in seconds; `ok` is the poller's last observed reachability.
#[derive(Debug, Clone)]
pub struct PathEntry {
    pub host: String,
    pub port: u16,
    pub transport: TransportKind,
    pub timeout: Duration,
    pub account: String,
    pub key: Option<Vec<u8>>,
    pub receiver: Option<u32>,
    pub line: Option<u32>,
    pub offset: i64,
    pub ok: i8,
}

impl PathEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        account: impl Into<String>,
        transport: TransportKind,
        timeout: Duration,
        key: Option<Vec<u8>>,
        receiver: Option<u32>,
        line: Option<u32>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            transport,
            timeout,
            account: account.into(),
            key,
            receiver,
            line,
            offset: 0,
            ok: 0,
        }
    }
}

/// The fixed 2x2 table of path slots, each independently nullable.
#[derive(Debug, Default)]
pub struct PathTable {
    main_primary: Option<PathEntry>,
    main_secondary: Option<PathEntry>,
    backup_primary: Option<PathEntry>,
    backup_secondary: Option<PathEntry>,
}

impl PathTable {
    pub fn get(&self, branch: Branch, slot: Slot) -> Option<&PathEntry> {
        self.cell(branch, slot).as_ref()
    }

    pub fn get_mut(&mut self, branch: Branch, slot: Slot) -> Option<&mut PathEntry> {
        self.cell_mut(branch, slot).as_mut()
    }

    pub fn set(&mut self, branch: Branch, slot: Slot, entry: PathEntry) {
        *self.cell_mut(branch, slot) = Some(entry);
    }

    pub fn clear(&mut self, branch: Branch, slot: Slot) {
        *self.cell_mut(branch, slot) = None;
    }

    /// Iterates all four slots in the canonical dispatch order: main
    /// primary, main secondary, back-up primary, back-up secondary.
    pub fn iter(&self) -> impl Iterator<Item = (Branch, Slot, &PathEntry)> {
        Branch::ALL
            .into_iter()
            .flat_map(|b| Slot::ALL.into_iter().map(move |s| (b, s)))
            .filter_map(move |(b, s)| self.get(b, s).map(|e| (b, s, e)))
    }

    fn cell(&self, branch: Branch, slot: Slot) -> &Option<PathEntry> {
        match (branch, slot) {
            (Branch::Main, Slot::Primary) => &self.main_primary,
            (Branch::Main, Slot::Secondary) => &self.main_secondary,
            (Branch::BackUp, Slot::Primary) => &self.backup_primary,
            (Branch::BackUp, Slot::Secondary) => &self.backup_secondary,
        }
    }

    fn cell_mut(&mut self, branch: Branch, slot: Slot) -> &mut Option<PathEntry> {
        match (branch, slot) {
            (Branch::Main, Slot::Primary) => &mut self.main_primary,
            (Branch::Main, Slot::Secondary) => &mut self.main_secondary,
            (Branch::BackUp, Slot::Primary) => &mut self.backup_primary,
            (Branch::BackUp, Slot::Secondary) => &mut self.backup_secondary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_iterates_nothing() {
        let t = PathTable::default();
        assert_eq!(t.iter().count(), 0);
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut t = PathTable::default();
        t.set(
            Branch::Main,
            Slot::Primary,
            PathEntry::new("h", 1234, "1234", TransportKind::Tcp, Duration::from_secs(5), None, None, None),
        );
        assert!(t.get(Branch::Main, Slot::Primary).is_some());
        assert!(t.get(Branch::Main, Slot::Secondary).is_none());
    }

    #[test]
    fn iteration_order_is_canonical() {
        let mut t = PathTable::default();
        for (b, s) in [
            (Branch::BackUp, Slot::Secondary),
            (Branch::Main, Slot::Secondary),
            (Branch::BackUp, Slot::Primary),
            (Branch::Main, Slot::Primary),
        ] {
            t.set(b, s, PathEntry::new("h", 1, "1", TransportKind::Tcp, Duration::from_secs(1), None, None, None));
        }
        let order: Vec<(Branch, Slot)> = t.iter().map(|(b, s, _)| (b, s)).collect();
        assert_eq!(
            order,
            vec![
                (Branch::Main, Slot::Primary),
                (Branch::Main, Slot::Secondary),
                (Branch::BackUp, Slot::Primary),
                (Branch::BackUp, Slot::Secondary),
            ]
        );
    }

    #[test]
    fn clear_removes_entry() {
        let mut t = PathTable::default();
        t.set(
            Branch::Main,
            Slot::Primary,
            PathEntry::new("h", 1, "1", TransportKind::Tcp, Duration::from_secs(1), None, None, None),
        );
        t.clear(Branch::Main, Slot::Primary);
        assert!(t.get(Branch::Main, Slot::Primary).is_none());
    }
}
