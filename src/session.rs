// src/session.rs - Interactive labeling session and its state machine
use chrono::{DateTime, Utc};
use indicatif::MultiProgress;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fmt;
use uuid::Uuid;

use crate::blocking::BlockingIndex;
use crate::clustering::{score_features, Cluster, Partitioner};
use crate::error::{DedupeError, Result};
use crate::learning::{ActiveLearningSampler, Classifier, ClassifierModel, TrainingExamples, UncertainPairs};
use crate::matching::{Comparator, FeatureCache};
use crate::models::{
    BlockingStats, CandidatePair, FeatureVector, FieldSet, Label, Record, RecordSet, SessionStats,
    TrainingSet,
};
use crate::utils::cancellation::CancellationFlag;
use crate::utils::dedupe_config::DedupeConfig;
use crate::utils::logging::SessionLogger;
use crate::utils::progress_config::phase_bar;

/// Where a session is in the label → train → partition cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Unlabeled,
    PartiallyLabeled,
    Trained,
    Partitioned,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Unlabeled => "unlabeled",
            SessionState::PartiallyLabeled => "partially_labeled",
            SessionState::Trained => "trained",
            SessionState::Partitioned => "partitioned",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One operator deduplicating one record set.
///
/// Candidate pairs and their features are computed once, on the first call that
/// needs them. If that work is interrupted through the cancellation flag, the
/// finished part is kept and the next call picks up where it stopped.
pub struct DedupeSession {
    session_id: String,
    created_at: DateTime<Utc>,
    config: DedupeConfig,
    records: RecordSet,
    index: BlockingIndex,
    comparator: Comparator,
    cache: FeatureCache,
    candidates: Option<BTreeSet<CandidatePair>>,
    candidate_features: Vec<(CandidatePair, FeatureVector)>,
    blocking_stats: Option<BlockingStats>,
    training: TrainingSet,
    pending: UncertainPairs,
    skipped: VecDeque<CandidatePair>,
    ranked: bool,
    classifier: Classifier,
    sampler: ActiveLearningSampler,
    partitioner: Partitioner,
    state: SessionState,
    clusters: Vec<Cluster>,
    cancel: CancellationFlag,
    multi_progress: Option<MultiProgress>,
    logger: SessionLogger,
}

impl DedupeSession {
    /// Compares records on every column.
    pub fn new(records: RecordSet, config: DedupeConfig) -> Result<Self> {
        let fields = FieldSet::all_columns(&records);
        Self::with_fields(records, fields, config)
    }

    pub fn with_fields(records: RecordSet, fields: FieldSet, config: DedupeConfig) -> Result<Self> {
        if !records.is_empty() {
            if fields.is_empty() {
                return Err(DedupeError::processing("No comparison fields configured"));
            }
            if let Some(unknown) = fields
                .fields()
                .iter()
                .find(|f| !records.columns().contains(&f.name))
            {
                return Err(DedupeError::processing(format!(
                    "Field '{}' does not appear in any record",
                    unknown.name
                )));
            }
        }

        let session_id = Uuid::new_v4().to_string();
        let logger = SessionLogger::new(&session_id);
        logger.log_start(records.len(), fields.len());

        Ok(Self {
            created_at: Utc::now(),
            index: BlockingIndex::new(config.blocking.clone(), fields.clone()),
            comparator: Comparator::new(fields),
            cache: FeatureCache::new(config.feature_cache_size),
            candidates: None,
            candidate_features: Vec::new(),
            blocking_stats: None,
            training: TrainingSet::new(),
            pending: UncertainPairs::default(),
            skipped: VecDeque::new(),
            ranked: false,
            classifier: Classifier::new(config.classifier.clone()),
            sampler: ActiveLearningSampler::new(config.classifier.seed),
            partitioner: Partitioner::new(config.cluster.clone()),
            state: SessionState::Unlabeled,
            clusters: Vec::new(),
            cancel: CancellationFlag::new(),
            multi_progress: None,
            logger,
            session_id,
            config,
            records,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn config(&self) -> &DedupeConfig {
        &self.config
    }

    pub fn records(&self) -> &RecordSet {
        &self.records
    }

    pub fn fields(&self) -> &FieldSet {
        self.comparator.fields()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn training_set(&self) -> &TrainingSet {
        &self.training
    }

    pub fn model(&self) -> Option<&ClassifierModel> {
        self.classifier.model()
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn blocking_stats(&self) -> Option<&BlockingStats> {
        self.blocking_stats.as_ref()
    }

    pub fn feature_cache(&self) -> &FeatureCache {
        &self.cache
    }

    /// A handle that interrupts blocking, feature extraction and scoring when set.
    pub fn cancellation_flag(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    pub fn set_multi_progress(&mut self, multi_progress: Option<MultiProgress>) {
        self.multi_progress = multi_progress;
    }

    /// Blocks the records, extracts candidate features and ranks the pending pairs.
    /// Calling it again after an interruption resumes the unfinished part.
    pub fn prepare(&mut self) -> Result<()> {
        if self.candidates.is_none() {
            self.logger.log_phase("Blocking", None);
            let (candidates, stats) =
                self.index
                    .index_with(&self.records, &self.cancel, self.multi_progress.as_ref())?;
            self.logger.log_blocking(&stats);
            self.blocking_stats = Some(stats);
            self.candidates = Some(candidates);
        }

        let Some(candidates) = self.candidates.as_ref() else {
            return Err(DedupeError::processing("Candidate pairs unavailable after blocking"));
        };

        let done = self.candidate_features.len();
        if done < candidates.len() {
            self.logger.log_phase(
                "Feature extraction",
                Some(&format!("{} of {} pairs remaining", candidates.len() - done, candidates.len())),
            );
            let pb = phase_bar(
                self.multi_progress.as_ref(),
                candidates.len() as u64,
                "Comparing candidate pairs...",
            );
            if let Some(pb) = &pb {
                pb.set_position(done as u64);
            }
            for (step, pair) in candidates.iter().enumerate().skip(done) {
                self.cancel.check(step, "Feature extraction")?;
                let features = self
                    .cache
                    .get_pair_features(&self.comparator, &self.records, pair)?;
                self.candidate_features.push((*pair, features));
                if let Some(pb) = &pb {
                    pb.inc(1);
                }
            }
            if let Some(pb) = &pb {
                pb.finish_with_message(format!("Compared {} pairs", candidates.len()));
            }
        }

        if !self.ranked {
            self.rerank();
            self.ranked = true;
        }
        Ok(())
    }

    /// The pair the operator should label next. Ranked pairs come first, skipped
    /// pairs after them. The same pair is returned until it is labeled or skipped.
    pub fn next_pair(&mut self) -> Result<Option<CandidatePair>> {
        self.prepare()?;
        Ok(self
            .pending
            .peek()
            .map(|s| s.pair)
            .or_else(|| self.skipped.front().copied()))
    }

    /// Records a human label. A pair can only be labeled once.
    pub fn label(&mut self, pair: CandidatePair, label: Label) -> Result<()> {
        self.validate_pair(&pair)?;
        if let Some(existing) = self.training.label_of(&pair) {
            return Err(DedupeError::processing(format!(
                "Pair {} is already labeled as {}",
                pair,
                existing.as_str()
            )));
        }
        self.record_label(pair, label);
        self.after_labeling()
    }

    /// Sends a pending pair to the back of the queue without labeling it.
    pub fn skip(&mut self, pair: CandidatePair) -> Result<()> {
        self.validate_pair(&pair)?;
        self.prepare()?;
        let was_pending = self.pending.remove(&pair);
        let position = self.skipped.iter().position(|p| *p == pair);
        if let Some(pos) = position {
            self.skipped.remove(pos);
        }
        if !was_pending && position.is_none() {
            return Err(DedupeError::processing(format!("Pair {} is not pending", pair)));
        }
        self.skipped.push_back(pair);
        debug!("Skipped pair {} ({} skipped)", pair, self.skipped.len());
        Ok(())
    }

    /// Labels many pairs at once. Nothing is recorded if any pair is invalid,
    /// already labeled, or listed twice. Returns the number of pairs added.
    pub fn mark_pairs(&mut self, labels: &TrainingSet) -> Result<usize> {
        let mut seen: HashSet<CandidatePair> = HashSet::new();
        for (pair, _) in labels.iter() {
            self.validate_pair(&pair)?;
            if self.training.label_of(&pair).is_some() {
                return Err(DedupeError::processing(format!("Pair {} is already labeled", pair)));
            }
            if !seen.insert(pair) {
                return Err(DedupeError::processing(format!("Pair {} is listed twice", pair)));
            }
        }
        for (pair, label) in labels.iter() {
            self.record_label(pair, label);
        }
        if !labels.is_empty() {
            self.after_labeling()?;
        }
        Ok(labels.len())
    }

    /// Fits a fresh classifier on every label so far.
    pub fn train(&mut self) -> Result<&ClassifierModel> {
        let examples = self.training_examples()?;
        self.logger
            .log_phase("Training", Some(&format!("{} labeled pairs", examples.len())));
        let version = self.classifier.train(&examples)?.version;
        self.logger.log_training(
            version,
            examples.len(),
            self.config.classifier.recommended_labeled_pairs,
        );
        self.state = SessionState::Trained;
        if self.ranked {
            self.rerank();
        }
        self.classifier
            .model()
            .ok_or_else(|| DedupeError::processing("Classifier has no model after training"))
    }

    /// Scores every candidate pair with the trained model and clusters the records.
    pub fn partition(&mut self) -> Result<&[Cluster]> {
        if !matches!(self.state, SessionState::Trained | SessionState::Partitioned) {
            return Err(DedupeError::processing(format!(
                "Cannot partition a session in state '{}'; train the classifier first",
                self.state
            )));
        }
        self.prepare()?;
        let model = self
            .classifier
            .model()
            .cloned()
            .ok_or_else(|| DedupeError::processing("No trained model available"))?;

        self.logger.log_phase(
            "Partitioning",
            Some(&format!("scoring {} candidate pairs", self.candidate_features.len())),
        );
        let scored = score_features(
            &self.candidate_features,
            &model,
            &self.cancel,
            self.multi_progress.as_ref(),
        )?;

        let records = &self.records;
        let comparator = &self.comparator;
        let cache = &mut self.cache;
        let (clusters, stats) = self.partitioner.cluster(records, &scored, |pair| {
            Ok(model.predict(&cache.get_pair_features(comparator, records, pair)?))
        })?;

        self.logger.log_partition(&stats);
        let (hits, misses) = self.cache.get_stats();
        debug!(
            "Feature cache: {} hits, {} misses ({:.1}% hit rate)",
            hits,
            misses,
            self.cache.hit_rate() * 100.0
        );
        self.clusters = clusters;
        self.state = SessionState::Partitioned;
        Ok(&self.clusters)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            pairs_remaining: self.pending.len() + self.skipped.len(),
            pairs_skipped: self.skipped.len(),
            labeled_match: self.training.matches.len(),
            labeled_distinct: self.training.distinct.len(),
            model_version: self.classifier.version(),
            state: self.state.to_string(),
        }
    }

    /// The last partition as lists of records, for showing to the operator.
    pub fn render_clusters(&self) -> Vec<Vec<&Record>> {
        self.clusters
            .iter()
            .map(|cluster| {
                cluster
                    .record_ids
                    .iter()
                    .filter_map(|id| self.records.get(*id))
                    .collect()
            })
            .collect()
    }

    fn validate_pair(&self, pair: &CandidatePair) -> Result<()> {
        if pair.is_self_pair() {
            return Err(DedupeError::processing(format!(
                "Cannot compare record {} with itself",
                pair.first()
            )));
        }
        for id in [pair.first(), pair.second()] {
            if !self.records.contains(id) {
                return Err(DedupeError::processing(format!("Unknown record id {}", id)));
            }
        }
        Ok(())
    }

    fn record_label(&mut self, pair: CandidatePair, label: Label) {
        self.pending.remove(&pair);
        self.skipped.retain(|p| *p != pair);
        self.training.push(pair, label);
        debug!("Labeled pair {} as {}", pair, label.as_str());
    }

    fn after_labeling(&mut self) -> Result<()> {
        self.state = SessionState::PartiallyLabeled;
        if self.config.retrain_on_label {
            let examples = self.training_examples()?;
            match self.classifier.train(&examples) {
                Ok(_) => {
                    if self.ranked {
                        self.rerank();
                    }
                }
                Err(DedupeError::InsufficientTrainingData { matches, distinct, .. }) => {
                    debug!(
                        "Not refitting sampling model yet ({} match, {} distinct)",
                        matches, distinct
                    );
                }
                Err(e) => return Err(e),
            }
        }
        self.logger.log_label_progress(&self.stats());
        Ok(())
    }

    fn training_examples(&mut self) -> Result<TrainingExamples> {
        let mut examples = TrainingExamples::default();
        for (pair, label) in self.training.iter() {
            let features = self
                .cache
                .get_pair_features(&self.comparator, &self.records, &pair)?;
            match label {
                Label::Match => examples.matches.push(features),
                Label::Distinct => examples.distinct.push(features),
            }
        }
        Ok(examples)
    }

    fn rerank(&mut self) {
        let mut excluded = self.training.labeled_pairs();
        excluded.extend(self.skipped.iter().copied());
        self.pending = self.sampler.uncertain_pairs(
            &self.candidate_features,
            &excluded,
            self.classifier.model(),
        );
        info!(
            "{} pairs awaiting labels ({} skipped)",
            self.pending.len(),
            self.skipped.len()
        );
    }
}
