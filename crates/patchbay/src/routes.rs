use std::collections::BTreeMap;

use patchproto::ClientId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub dst: ClientId,
    pub dst_ch: usize,
}

/// (source, output channel) -> (destination, input channel).
///
/// Entries are only ever overwritten, never implicitly removed; presence
/// says nothing about whether either endpoint is still connected. The
/// dispatcher checks destination liveness at forward time.
#[derive(Debug, Default)]
pub struct RoutingTable {
    map: BTreeMap<(ClientId, usize), Route>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditional overwrite; last write wins.
    pub fn set(&mut self, src: ClientId, src_ch: usize, dst: ClientId, dst_ch: usize) {
        self.map.insert((src, src_ch), Route { dst, dst_ch });
    }

    pub fn get(&self, src: ClientId, src_ch: usize) -> Option<Route> {
        self.map.get(&(src, src_ch)).copied()
    }

    /// All entries, ordered by (source, channel).
    pub fn iter(&self) -> impl Iterator<Item = (ClientId, usize, Route)> + '_ {
        self.map.iter().map(|(&(src, ch), &r)| (src, ch, r))
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_does_not_need_connected_endpoints() {
        let mut t = RoutingTable::new();
        t.set(ClientId(10), 4, ClientId(99), 0);
        assert_eq!(
            t.get(ClientId(10), 4),
            Some(Route {
                dst: ClientId(99),
                dst_ch: 0
            })
        );
        assert_eq!(t.get(ClientId(10), 3), None);
    }

    #[test]
    fn last_write_wins() {
        let mut t = RoutingTable::new();
        t.set(ClientId(1), 0, ClientId(2), 0);
        t.set(ClientId(1), 0, ClientId(3), 4);
        assert_eq!(
            t.get(ClientId(1), 0),
            Some(Route {
                dst: ClientId(3),
                dst_ch: 4
            })
        );
    }

    #[test]
    fn iterates_in_source_then_channel_order() {
        let mut t = RoutingTable::new();
        t.set(ClientId(2), 0, ClientId(1), 0);
        t.set(ClientId(1), 3, ClientId(2), 1);
        t.set(ClientId(1), 0, ClientId(2), 2);

        let order: Vec<(ClientId, usize)> = t.iter().map(|(s, ch, _)| (s, ch)).collect();
        assert_eq!(
            order,
            vec![(ClientId(1), 0), (ClientId(1), 3), (ClientId(2), 0)]
        );
    }
}
