// INTELLIPLUG DECISION LOG
// RECORDS ONE ENTRY PER EXECUTED CONTROL CYCLE
// PRE-ALLOCATED RING BUFFER. NO HEAP ALLOCATION WHILE GOVERNING.
// WRAPS AROUND AT CAPACITY -- OLDEST ENTRIES OVERWRITTEN.

use crate::tuning::GOVERNED_CORES;

const MAX_RECORDS: usize = 8192;

#[derive(Clone, Copy, Default)]
pub struct CycleRecord {
    pub ts_ns:         u64,
    pub load:          u32,   // NORMALIZED TO TABLE RESOLUTION
    pub rank:          u32,
    pub online_before: u32,
    pub online_after:  u32,
    pub persistence:   u32,
    pub eco:           bool,
}

pub struct DecisionLog {
    records: Vec<CycleRecord>,
    head:    usize,
    len:     usize,
}

impl Default for DecisionLog {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionLog {
    pub fn new() -> Self {
        Self {
            records: vec![CycleRecord::default(); MAX_RECORDS],
            head: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // RECORD ONE CYCLE. OVERWRITES OLDEST ENTRY WHEN FULL.
    // RETURNS THE ENTRY AS STORED (TIMESTAMPED).
    pub fn record(&mut self, mut rec: CycleRecord) -> CycleRecord {
        rec.ts_ns = now_ns();
        self.records[self.head] = rec;
        self.head = (self.head + 1) % MAX_RECORDS;
        if self.len < MAX_RECORDS {
            self.len += 1;
        }
        rec
    }

    // ITERATE RECORDS IN CHRONOLOGICAL ORDER
    pub fn iter_chronological(&self) -> impl Iterator<Item = &CycleRecord> {
        let start = if self.len < MAX_RECORDS { 0 } else { self.head };
        (0..self.len).map(move |i| {
            &self.records[(start + i) % MAX_RECORDS]
        })
    }

    // CYCLES SPENT AT EACH RANK, INDEX 0 = RANK 1
    pub fn rank_histogram(&self) -> [u64; GOVERNED_CORES as usize] {
        let mut hist = [0u64; GOVERNED_CORES as usize];
        for r in self.iter_chronological() {
            if (1..=GOVERNED_CORES).contains(&r.rank) {
                hist[r.rank as usize - 1] += 1;
            }
        }
        hist
    }

    // CYCLES THAT CHANGED THE ONLINE COUNT
    pub fn topology_changes(&self) -> u64 {
        self.iter_chronological()
            .filter(|r| r.online_before != r.online_after)
            .count() as u64
    }

    // DUMP THE TIME SERIES
    pub fn dump(&self) {
        let mut iter = self.iter_chronological();
        let Some(first) = iter.next() else {
            return;
        };
        let base_ts = first.ts_ns;

        println!("\n{:<10} {:<8} {:<6} {:<8} {:<8} {:<8} {:<5}",
            "TIME_S", "LOAD", "RANK", "ONLINE", "AFTER", "PERSIST", "MODE");
        println!("{}", "-".repeat(60));

        for r in std::iter::once(first).chain(iter) {
            let elapsed_s = (r.ts_ns - base_ts) as f64 / 1_000_000_000.0;
            println!("{:<10.2} {:<8} {:<6} {:<8} {:<8} {:<8} {:<5}",
                elapsed_s, r.load, r.rank, r.online_before, r.online_after,
                r.persistence, if r.eco { "ECO" } else { "FULL" });
        }

        if self.len == MAX_RECORDS {
            println!("\n(RING BUFFER WRAPPED -- SHOWING MOST RECENT {} CYCLES)", MAX_RECORDS);
        }
        println!("TOTAL CYCLES: {}", self.len);
    }

    // SUMMARY STATISTICS
    pub fn summary(&self) {
        if self.len < 2 {
            return;
        }

        let records: Vec<&CycleRecord> = self.iter_chronological().collect();
        let (Some(first), Some(last)) = (records.first(), records.last()) else {
            return;
        };
        let elapsed_s = (last.ts_ns - first.ts_ns) as f64 / 1_000_000_000.0;
        let peak_load = records.iter().map(|r| r.load).max().unwrap_or(0);
        let hist = self.rank_histogram();
        let total: u64 = hist.iter().sum();

        println!("\n{}", "=".repeat(50));
        println!("INTELLIPLUG SUMMARY");
        println!("{}", "=".repeat(50));
        println!("  CYCLES:            {}", self.len);
        println!("  TOPOLOGY CHANGES:  {}", self.topology_changes());
        println!("  PEAK LOAD:         {}", peak_load);
        if total > 0 {
            let pct: Vec<String> = hist.iter()
                .enumerate()
                .map(|(i, &n)| format!("{}C {:.1}%", i + 1, n as f64 / total as f64 * 100.0))
                .collect();
            println!("  RANK DISTRIBUTION: {}", pct.join(" / "));
        }
        println!("  ELAPSED:           {:.1}s", elapsed_s);
    }
}

pub fn now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(rank: u32, before: u32, after: u32) -> CycleRecord {
        CycleRecord {
            load: rank * 4,
            rank,
            online_before: before,
            online_after: after,
            ..CycleRecord::default()
        }
    }

    #[test]
    fn record_stamps_time() {
        let mut log = DecisionLog::new();
        assert!(log.is_empty());

        let stored = log.record(rec(2, 1, 2));
        assert_eq!(log.len(), 1);
        assert_eq!(stored.ts_ns, log.records[0].ts_ns);
        assert_eq!(log.records[0].rank, 2);
        assert_eq!(log.records[0].online_after, 2);
        assert!(log.records[0].ts_ns > 0);
    }

    #[test]
    fn ring_buffer_wraps() {
        let mut log = DecisionLog::new();

        // FILL TO CAPACITY
        for i in 0..MAX_RECORDS {
            log.record(CycleRecord { load: i as u32, ..CycleRecord::default() });
        }
        assert_eq!(log.len, MAX_RECORDS);
        assert_eq!(log.head, 0);

        // ONE MORE OVERWRITES OLDEST
        log.record(CycleRecord { load: 9999, ..CycleRecord::default() });
        assert_eq!(log.len, MAX_RECORDS);
        assert_eq!(log.head, 1);

        let ordered: Vec<u32> = log.iter_chronological().map(|r| r.load).collect();
        assert_eq!(ordered[0], 1);
        assert_eq!(ordered.last().copied(), Some(9999));
        assert_eq!(ordered.len(), MAX_RECORDS);
    }

    #[test]
    fn histogram_and_changes() {
        let mut log = DecisionLog::new();
        log.record(rec(1, 1, 1));
        log.record(rec(2, 1, 2));
        log.record(rec(2, 2, 2));
        log.record(rec(4, 3, 4));
        assert_eq!(log.rank_histogram(), [1, 2, 0, 1]);
        assert_eq!(log.topology_changes(), 2);
    }

    #[test]
    fn summary_and_dump_no_panic() {
        let mut log = DecisionLog::new();
        log.summary();
        log.dump();
        log.record(rec(1, 1, 1));
        log.summary();
        log.record(rec(3, 2, 3));
        log.dump();
        log.summary();
    }
}
