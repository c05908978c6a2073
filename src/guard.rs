/// Request fencing with one monotonic counter per operation class.
///
/// Before an operation starts it takes a ticket (the counter after
/// increment). Its result may touch shared state only while that ticket is
/// still the newest for its class; anything older is dropped on arrival.
/// Network requests are never cancelled; superseding them is enough.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpClass {
    History,
    Directory,
    Send,
}

impl OpClass {
    fn slot(self) -> usize {
        match self {
            OpClass::History => 0,
            OpClass::Directory => 1,
            OpClass::Send => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    class: OpClass,
    seq: u64,
}

#[derive(Debug, Default)]
pub struct RequestGuard {
    counters: [u64; 3],
}

impl RequestGuard {
    /// Stamp a new operation of `class`. Every earlier ticket of the same
    /// class becomes stale.
    pub fn issue(&mut self, class: OpClass) -> Ticket {
        let slot = &mut self.counters[class.slot()];
        *slot += 1;
        Ticket { class, seq: *slot }
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.counters[ticket.class.slot()] == ticket.seq
    }

    /// Make any outstanding ticket of `class` stale without starting anything.
    pub fn invalidate(&mut self, class: OpClass) {
        self.counters[class.slot()] += 1;
    }

    pub fn invalidate_all(&mut self) {
        for c in &mut self.counters {
            *c += 1;
        }
    }
}
