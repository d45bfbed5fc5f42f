//! Count aggregation: (user_id, artist_id) pairs → listen counts.
//!
//! Counts are exact. Rows come out in the order their key was first seen;
//! that order is an implementation detail, not something consumers should
//! depend on.

use crate::error::{PipelineError, PipelineResult};
use crate::models::{AggregateStats, UserArtistCount, UserArtistPair};
use crate::progress::Progress;
use crate::table;
use rustc_hash::FxHashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

// ============================================================================
// String Interning
// ============================================================================

/// String interner for deduplicating ids across many pairs.
/// A heavy listener appears in thousands of pairs; the id is stored once.
#[derive(Default)]
pub struct StringInterner {
    strings: FxHashMap<Arc<str>, Arc<str>>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning a reference-counted handle.
    /// If the string was seen before, returns the existing Arc.
    pub fn intern(&mut self, s: &str) -> Arc<str> {
        if let Some(existing) = self.strings.get(s) {
            return Arc::clone(existing);
        }
        let arc: Arc<str> = Arc::from(s);
        self.strings.insert(Arc::clone(&arc), Arc::clone(&arc));
        arc
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

// ============================================================================
// Aggregation
// ============================================================================

/// Exact multiset counter over (user_id, artist_id) keys.
#[derive(Default)]
pub struct CountAggregator {
    users: StringInterner,
    artists: StringInterner,
    /// Key → position in `counts`.
    index: FxHashMap<(Arc<str>, Arc<str>), usize>,
    /// (user, artist, count) in first-seen order.
    counts: Vec<(Arc<str>, Arc<str>, u64)>,
    input_pairs: u64,
}

impl CountAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, user_id: &str, artist_id: &str) {
        self.input_pairs += 1;
        let user = self.users.intern(user_id);
        let artist = self.artists.intern(artist_id);
        match self.index.get(&(Arc::clone(&user), Arc::clone(&artist))) {
            Some(&i) => self.counts[i].2 += 1,
            None => {
                self.index
                    .insert((Arc::clone(&user), Arc::clone(&artist)), self.counts.len());
                self.counts.push((user, artist, 1));
            }
        }
    }

    pub fn add_pair(&mut self, pair: &UserArtistPair) {
        self.add(&pair.user_id, &pair.artist_id);
    }

    /// Current count for a key; zero if never seen.
    pub fn count(&self, user_id: &str, artist_id: &str) -> u64 {
        let key: (Arc<str>, Arc<str>) = (Arc::from(user_id), Arc::from(artist_id));
        self.index.get(&key).map(|&i| self.counts[i].2).unwrap_or(0)
    }

    pub fn stats(&self) -> AggregateStats {
        AggregateStats {
            input_pairs: self.input_pairs,
            unique_pairs: self.counts.len() as u64,
            unique_users: self.users.len() as u64,
            unique_artists: self.artists.len() as u64,
        }
    }

    /// Counts in first-seen key order.
    pub fn iter(&self) -> impl Iterator<Item = UserArtistCount> + '_ {
        self.counts
            .iter()
            .map(|(user, artist, count)| UserArtistCount {
                user_id: user.to_string(),
                artist_id: artist.to_string(),
                listen_count: *count,
            })
    }
}

impl<'a> FromIterator<&'a UserArtistPair> for CountAggregator {
    fn from_iter<I: IntoIterator<Item = &'a UserArtistPair>>(iter: I) -> Self {
        let mut agg = CountAggregator::new();
        for pair in iter {
            agg.add_pair(pair);
        }
        agg
    }
}

/// Read resolved pairs from `reader` into an aggregator.
pub fn count_pairs<R: Read>(
    reader: &mut csv::Reader<R>,
    source: &Path,
    mut on_pair: impl FnMut(u64),
) -> PipelineResult<CountAggregator> {
    let mut agg = CountAggregator::new();
    let mut record = csv::StringRecord::new();
    let headers = reader
        .byte_headers()
        .map_err(|e| PipelineError::csv(source, e))?
        .clone();
    let user_idx = table::column_index(&headers, "user_id", source)?;
    let artist_idx = table::column_index(&headers, "artist_id", source)?;

    while reader
        .read_record(&mut record)
        .map_err(|e| PipelineError::csv(source, e))?
    {
        agg.add(&record[user_idx], &record[artist_idx]);
        on_pair(agg.input_pairs);
    }
    Ok(agg)
}

/// Write counts as `user_id,artist_id,listen_count` rows.
pub fn write_counts<W: Write>(
    agg: &CountAggregator,
    writer: &mut csv::Writer<W>,
    output: &Path,
) -> PipelineResult<()> {
    for row in agg.iter() {
        writer
            .serialize(&row)
            .map_err(|e| PipelineError::csv(output, e))?;
    }
    writer.flush().map_err(|e| PipelineError::io(output, e))
}

/// Aggregate a `user_id,artist_id` CSV into listen counts at `output`.
pub fn aggregate_listens(
    input: &Path,
    output: &Path,
    progress: Progress,
) -> PipelineResult<AggregateStats> {
    table::validate_output_path(output, &[input])?;

    let mut reader = table::open_reader(input, false)?;
    let pb = progress.spinner("Counting user-artist pairs");
    let agg = count_pairs(&mut reader, input, |n| {
        if n % 10_000 == 0 {
            pb.set_position(n);
        }
        progress.log_count("aggregate", n);
    })?;
    pb.finish_with_message(format!("Counted {} pairs", agg.input_pairs));

    let mut writer = table::create_writer(output, &["user_id", "artist_id", "listen_count"])?;
    write_counts(&agg, &mut writer, output)?;

    let stats = agg.stats();
    info!(
        "Aggregated {} pairs into {} counts ({} users, {} artists) at {}",
        stats.input_pairs,
        stats.unique_pairs,
        stats.unique_users,
        stats.unique_artists,
        output.display()
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;
    use std::fs;

    fn pair(user_id: &str, artist_id: &str) -> UserArtistPair {
        UserArtistPair {
            user_id: user_id.to_string(),
            artist_id: artist_id.to_string(),
        }
    }

    #[test]
    fn test_interner_dedupes() {
        let mut interner = StringInterner::new();
        let a = interner.intern("u1");
        let b = interner.intern("u1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn test_counts_are_exact_and_unique() {
        let pairs = vec![
            pair("u1", "a1"),
            pair("u2", "a1"),
            pair("u1", "a2"),
            pair("u1", "a1"),
            pair("u1", "a1"),
        ];
        let agg: CountAggregator = pairs.iter().collect();
        let counts: Vec<UserArtistCount> = agg.iter().collect();

        let keys: FxHashSet<(String, String)> = counts
            .iter()
            .map(|c| (c.user_id.clone(), c.artist_id.clone()))
            .collect();
        assert_eq!(keys.len(), counts.len());

        for c in &counts {
            let expected = pairs
                .iter()
                .filter(|p| p.user_id == c.user_id && p.artist_id == c.artist_id)
                .count() as u64;
            assert_eq!(c.listen_count, expected);
            assert!(c.listen_count > 0);
        }
    }

    #[test]
    fn test_first_seen_order() {
        let pairs = [pair("u2", "a1"), pair("u1", "a1"), pair("u2", "a1")];
        let agg: CountAggregator = pairs.iter().collect();
        let counts: Vec<UserArtistCount> = agg.iter().collect();
        assert_eq!(counts[0].user_id, "u2");
        assert_eq!(counts[0].listen_count, 2);
        assert_eq!(counts[1].user_id, "u1");
    }

    #[test]
    fn test_user_artist_split_is_not_ambiguous() {
        // Keys are tuples, so ("u1,a", "b") and ("u1", "a,b") stay distinct.
        let mut agg = CountAggregator::new();
        agg.add("u1,a", "b");
        agg.add("u1", "a,b");
        assert_eq!(agg.stats().unique_pairs, 2);
        assert_eq!(agg.count("u1", "a,b"), 1);
        assert_eq!(agg.count("u1", "zz"), 0);
    }

    #[test]
    fn test_stats() {
        let pairs = [pair("u1", "a1"), pair("u1", "a1"), pair("u2", "a1")];
        let stats = pairs.iter().collect::<CountAggregator>().stats();
        assert_eq!(
            stats,
            AggregateStats {
                input_pairs: 3,
                unique_pairs: 2,
                unique_users: 2,
                unique_artists: 1,
            }
        );
    }

    #[test]
    fn test_aggregate_listens_files() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("userid-artist.csv");
        fs::write(&input, "user_id,artist_id\nu1,a1\nu1,a1\nu2,a1\n").unwrap();
        let output = dir.path().join("final/userid-artist-counts.csv");

        let stats = aggregate_listens(&input, &output, Progress::hidden()).unwrap();
        assert_eq!(stats.unique_pairs, 2);
        assert_eq!(
            fs::read_to_string(&output).unwrap(),
            "user_id,artist_id,listen_count\nu1,a1,2\nu2,a1,1\n"
        );
    }

    #[test]
    fn test_aggregate_empty_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("userid-artist.csv");
        fs::write(&input, "user_id,artist_id\n").unwrap();
        let output = dir.path().join("counts.csv");

        let stats = aggregate_listens(&input, &output, Progress::hidden()).unwrap();
        assert_eq!(stats.input_pairs, 0);
        assert_eq!(
            fs::read_to_string(&output).unwrap(),
            "user_id,artist_id,listen_count\n"
        );
    }
}
