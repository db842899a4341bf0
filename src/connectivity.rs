use std::sync::atomic::{AtomicBool, Ordering};

/// Answers whether network access is allowed right now. Must not block.
pub trait ConnectivityGate: Send + Sync {
    fn is_allowed(&self) -> bool;
}

/// Gate fed by the host's connectivity monitor plus the wifi-only preference.
#[derive(Debug)]
pub struct NetworkGate {
    online: AtomicBool,
    metered: AtomicBool,
    only_wifi: bool,
}

impl NetworkGate {
    pub fn new(only_wifi: bool) -> Self {
        Self {
            online: AtomicBool::new(true),
            metered: AtomicBool::new(false),
            only_wifi,
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_metered(&self, metered: bool) {
        self.metered.store(metered, Ordering::SeqCst);
    }
}

impl ConnectivityGate for NetworkGate {
    fn is_allowed(&self) -> bool {
        if !self.online.load(Ordering::SeqCst) {
            return false;
        }
        !(self.only_wifi && self.metered.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_is_never_allowed() {
        let gate = NetworkGate::new(false);
        assert!(gate.is_allowed());
        gate.set_online(false);
        assert!(!gate.is_allowed());
    }

    #[test]
    fn metered_blocks_only_with_wifi_preference() {
        let gate = NetworkGate::new(false);
        gate.set_metered(true);
        assert!(gate.is_allowed());

        let gate = NetworkGate::new(true);
        gate.set_metered(true);
        assert!(!gate.is_allowed());
        gate.set_metered(false);
        assert!(gate.is_allowed());
    }
}
