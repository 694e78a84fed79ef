use std::collections::BTreeMap;
use std::net::SocketAddr;

use bytes::Bytes;
use patchproto::{CHANNEL_COUNT, ClientId};
use tokio::sync::mpsc;

/// Cached channel texts are clamped to this many characters.
pub const MAX_CACHED_LEN: usize = 512;

/// Last-seen message text per channel, in each direction. Written only by
/// the dispatcher; read by the console views and the monitor/recorder.
#[derive(Debug, Default)]
pub struct ChannelCache {
    pub last_out: [String; CHANNEL_COUNT],
    pub last_in: [String; CHANNEL_COUNT],
}

#[derive(Debug)]
pub struct Client {
    pub id: ClientId,
    pub peer: SocketAddr,
    pub label: String,
    pub live: bool,
    pub cache: ChannelCache,
    write_tx: Option<mpsc::Sender<Bytes>>,
}

impl Client {
    /// Queue bytes for the connection writer. Never blocks: a full or closed
    /// write queue drops the message.
    pub fn send(&self, b: Bytes) {
        if let Some(tx) = &self.write_tx {
            let _ = tx.try_send(b);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryFull;

impl std::fmt::Display for RegistryFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("no free client slots")
    }
}

impl std::error::Error for RegistryFull {}

/// All known clients, keyed by identifier. Entries for departed clients are
/// kept (not-live) so cached channel history stays readable and identifiers
/// are never reused; only live connections count against capacity.
#[derive(Debug)]
pub struct Registry {
    clients: BTreeMap<ClientId, Client>,
    capacity: usize,
    live: usize,
    next_id: u32,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        Self {
            clients: BTreeMap::new(),
            capacity: capacity.max(1),
            live: 0,
            next_id: 1,
        }
    }

    pub fn allocate(
        &mut self,
        peer: SocketAddr,
        write_tx: mpsc::Sender<Bytes>,
    ) -> Result<ClientId, RegistryFull> {
        if self.live >= self.capacity {
            return Err(RegistryFull);
        }
        let id = ClientId(self.next_id);
        self.next_id += 1;
        self.live += 1;
        self.clients.insert(
            id,
            Client {
                id,
                peer,
                label: format!("Client{id}"),
                live: true,
                cache: ChannelCache::default(),
                write_tx: Some(write_tx),
            },
        );
        Ok(id)
    }

    /// Mark a client as gone and close its write side. Cached channel
    /// history and routing entries naming the identifier are kept; the entry
    /// stays resolvable as not-live.
    pub fn release(&mut self, id: ClientId) -> bool {
        let Some(c) = self.clients.get_mut(&id) else {
            return false;
        };
        if !c.live {
            return false;
        }
        c.live = false;
        c.write_tx = None;
        self.live -= 1;
        true
    }

    pub fn release_all(&mut self) {
        for c in self.clients.values_mut() {
            c.live = false;
            c.write_tx = None;
        }
        self.live = 0;
    }

    pub fn find(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    pub fn is_live(&self, id: ClientId) -> bool {
        self.clients.get(&id).is_some_and(|c| c.live)
    }

    pub fn record_output(&mut self, id: ClientId, channel: usize, text: &str) {
        if channel >= CHANNEL_COUNT {
            return;
        }
        if let Some(c) = self.clients.get_mut(&id) {
            c.cache.last_out[channel] = clamp_text(text, MAX_CACHED_LEN);
        }
    }

    pub fn record_input(&mut self, id: ClientId, channel: usize, text: &str) {
        if channel >= CHANNEL_COUNT {
            return;
        }
        if let Some(c) = self.clients.get_mut(&id) {
            c.cache.last_in[channel] = clamp_text(text, MAX_CACHED_LEN);
        }
    }

    /// Live clients in identifier order.
    pub fn live_clients(&self) -> impl Iterator<Item = &Client> {
        self.clients.values().filter(|c| c.live)
    }

    pub fn live_ids(&self) -> Vec<ClientId> {
        self.live_clients().map(|c| c.id).collect()
    }

    pub fn live_count(&self) -> usize {
        self.live
    }
}

fn clamp_text(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}
