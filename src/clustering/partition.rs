// src/clustering/partition.rs - Graph partitioning of scored candidate pairs

use indicatif::MultiProgress;
use log::{debug, info};
use petgraph::algo::connected_components;
use petgraph::graph::{NodeIndex, UnGraph};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::blocking::BlockingIndex;
use crate::error::Result;
use crate::learning::ClassifierModel;
use crate::matching::{Comparator, FeatureCache};
use crate::models::{
    CandidatePair, CoherenceScore, FeatureVector, FieldSet, PartitionStats, RecordId, RecordSet,
};
use crate::utils::cancellation::CancellationFlag;
use crate::utils::env::env_or;
use crate::utils::progress_config::phase_bar;

const MATCH_THRESHOLD: f64 = 0.5;
const COHESION_THRESHOLD: f64 = 0.7;
const MAX_COMPONENT_SIZE: usize = 300;
const THRESHOLD_STEP: f64 = 0.05;

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    /// Edges below this probability are not kept
    pub match_threshold: f64,
    /// Components whose mean pairwise probability falls below this are re-clustered
    pub cohesion_threshold: f64,
    /// Components above this size are split by raising the edge threshold
    pub max_component_size: usize,
    pub threshold_step: f64,
    pub include_singletons: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            match_threshold: MATCH_THRESHOLD,
            cohesion_threshold: COHESION_THRESHOLD,
            max_component_size: MAX_COMPONENT_SIZE,
            threshold_step: THRESHOLD_STEP,
            include_singletons: true,
        }
    }
}

impl ClusterConfig {
    pub fn from_env() -> Self {
        Self {
            match_threshold: env_or("DEDUPE_MATCH_THRESHOLD", MATCH_THRESHOLD).clamp(0.0, 1.0),
            cohesion_threshold: env_or("DEDUPE_COHESION_THRESHOLD", COHESION_THRESHOLD),
            max_component_size: env_or("DEDUPE_MAX_COMPONENT_SIZE", MAX_COMPONENT_SIZE).max(2),
            threshold_step: env_or("DEDUPE_THRESHOLD_STEP", THRESHOLD_STEP).max(0.001),
            include_singletons: env_or("DEDUPE_INCLUDE_SINGLETONS", true),
        }
    }
}

/// A group of records believed to be the same entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Sorted ascending
    pub record_ids: Vec<RecordId>,
    /// Mean match probability of each record to the other members, aligned with `record_ids`
    pub scores: Vec<f64>,
    pub coherence: CoherenceScore,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.record_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record_ids.is_empty()
    }

    pub fn is_singleton(&self) -> bool {
        self.record_ids.len() == 1
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.record_ids.binary_search(&id).is_ok()
    }
}

/// Scores every candidate pair with the model, going through the feature cache.
pub fn score_candidates(
    candidates: &BTreeSet<CandidatePair>,
    records: &RecordSet,
    comparator: &Comparator,
    cache: &mut FeatureCache,
    model: &ClassifierModel,
    cancel: &CancellationFlag,
    multi_progress: Option<&MultiProgress>,
) -> Result<Vec<(CandidatePair, f64)>> {
    let mut features = Vec::with_capacity(candidates.len());
    for (i, pair) in candidates.iter().enumerate() {
        cancel.check(i, "Feature extraction")?;
        features.push((*pair, cache.get_pair_features(comparator, records, pair)?));
    }
    score_features(&features, model, cancel, multi_progress)
}

/// Scores pairs whose feature vectors are already known.
pub fn score_features(
    features: &[(CandidatePair, FeatureVector)],
    model: &ClassifierModel,
    cancel: &CancellationFlag,
    multi_progress: Option<&MultiProgress>,
) -> Result<Vec<(CandidatePair, f64)>> {
    let pb = phase_bar(multi_progress, features.len() as u64, "Scoring candidate pairs...");
    let mut scored = Vec::with_capacity(features.len());
    for (i, (pair, vector)) in features.iter().enumerate() {
        cancel.check(i, "Scoring")?;
        scored.push((*pair, model.predict(vector)));
        if let Some(pb) = &pb {
            pb.inc(1);
        }
    }
    if let Some(pb) = &pb {
        pb.finish_with_message(format!("Scored {} pairs", scored.len()));
    }
    Ok(scored)
}

/// Turns pairwise probabilities into disjoint clusters.
pub struct Partitioner {
    config: ClusterConfig,
}

impl Partitioner {
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// `scored` holds the candidate pair probabilities. `score_missing` is asked for
    /// pairs inside a component that blocking never proposed, so cohesion is judged
    /// on every member pair.
    pub fn cluster<F>(
        &self,
        records: &RecordSet,
        scored: &[(CandidatePair, f64)],
        mut score_missing: F,
    ) -> Result<(Vec<Cluster>, PartitionStats)>
    where
        F: FnMut(&CandidatePair) -> Result<f64>,
    {
        let mut stats = PartitionStats {
            pairs_scored: scored.len(),
            ..Default::default()
        };

        let mut scores: HashMap<CandidatePair, f64> = HashMap::with_capacity(scored.len());
        let mut graph: UnGraph<RecordId, f64> = UnGraph::new_undirected();
        let mut node_map: HashMap<RecordId, NodeIndex> = HashMap::new();
        for id in records.ids() {
            node_map.insert(id, graph.add_node(id));
        }

        for (pair, probability) in scored {
            scores.insert(*pair, *probability);
            if *probability < self.config.match_threshold || pair.is_self_pair() {
                continue;
            }
            if let (Some(&a), Some(&b)) = (node_map.get(&pair.first()), node_map.get(&pair.second())) {
                graph.add_edge(a, b, *probability);
            }
        }
        stats.edges_kept = graph.edge_count();
        stats.initial_components = connected_components(&graph);
        info!(
            "Record graph: {} nodes, {} edges, {} connected components",
            graph.node_count(),
            graph.edge_count(),
            stats.initial_components
        );

        let mut groups: Vec<Vec<RecordId>> = Vec::new();
        for component in graph_components(&graph) {
            if component.len() > self.config.max_component_size {
                stats.components_split_for_size += 1;
                let pieces = self.split_oversized(component, &scores, self.config.match_threshold);
                groups.extend(pieces);
            } else {
                groups.push(component);
            }
        }

        let mut clusters = Vec::with_capacity(groups.len());
        for members in groups {
            if members.len() > 2 {
                fill_missing_scores(&members, &mut scores, &mut score_missing)?;
                let cohesion = mean_pairwise(&members, &members, &scores);
                if cohesion < self.config.cohesion_threshold {
                    debug!(
                        "Component of {} records has cohesion {:.3}; refining",
                        members.len(),
                        cohesion
                    );
                    stats.components_refined += 1;
                    for refined in self.average_linkage(&members, &scores) {
                        clusters.push(self.build_cluster(refined, &scores));
                    }
                    continue;
                }
            }
            clusters.push(self.build_cluster(members, &scores));
        }

        stats.singletons = clusters.iter().filter(|c| c.is_singleton()).count();
        if !self.config.include_singletons {
            clusters.retain(|c| !c.is_singleton());
        }
        clusters.sort_by_key(|c| c.record_ids[0]);

        stats.clusters = clusters.len();
        let multi: Vec<f64> = clusters
            .iter()
            .filter(|c| !c.is_singleton())
            .map(|c| c.coherence.overall_score)
            .collect();
        stats.avg_coherence = if multi.is_empty() {
            0.0
        } else {
            multi.iter().sum::<f64>() / multi.len() as f64
        };

        Ok((clusters, stats))
    }

    /// Raises the edge threshold until every piece fits. At a threshold above 1.0
    /// no edge survives, so this always terminates.
    fn split_oversized(
        &self,
        members: Vec<RecordId>,
        scores: &HashMap<CandidatePair, f64>,
        threshold: f64,
    ) -> Vec<Vec<RecordId>> {
        let next_threshold = threshold + self.config.threshold_step;
        let mut graph: UnGraph<RecordId, f64> = UnGraph::new_undirected();
        let mut node_map: HashMap<RecordId, NodeIndex> = HashMap::new();
        for &id in &members {
            node_map.insert(id, graph.add_node(id));
        }
        for (i, &a) in members.iter().enumerate() {
            for &b in &members[i + 1..] {
                if let Some(&p) = scores.get(&CandidatePair::new(a, b)) {
                    if p >= next_threshold {
                        graph.add_edge(node_map[&a], node_map[&b], p);
                    }
                }
            }
        }

        let mut pieces = Vec::new();
        for piece in graph_components(&graph) {
            if piece.len() > self.config.max_component_size && next_threshold <= 1.0 {
                pieces.extend(self.split_oversized(piece, scores, next_threshold));
            } else {
                pieces.push(piece);
            }
        }
        debug!(
            "Split component of {} records into {} pieces at threshold {:.2}",
            members.len(),
            pieces.len(),
            next_threshold
        );
        pieces
    }

    /// Agglomerative clustering that only merges groups whose average pairwise
    /// probability clears the match threshold, so weak links cannot chain.
    fn average_linkage(
        &self,
        members: &[RecordId],
        scores: &HashMap<CandidatePair, f64>,
    ) -> Vec<Vec<RecordId>> {
        let n = members.len();
        let mut groups: Vec<Option<Vec<RecordId>>> = members.iter().map(|&id| Some(vec![id])).collect();
        // linkage_sum[i][j]: summed probability between groups i and j
        let mut linkage_sum = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let p = pair_score(members[i], members[j], scores);
                linkage_sum[i][j] = p;
                linkage_sum[j][i] = p;
            }
        }

        loop {
            let mut best: Option<(usize, usize, f64)> = None;
            for i in 0..n {
                let Some(gi) = &groups[i] else { continue };
                for j in (i + 1)..n {
                    let Some(gj) = &groups[j] else { continue };
                    let average = linkage_sum[i][j] / (gi.len() * gj.len()) as f64;
                    if best.map_or(true, |(_, _, b)| average > b) {
                        best = Some((i, j, average));
                    }
                }
            }

            match best {
                Some((i, j, average)) if average >= self.config.match_threshold => {
                    let absorbed = groups[j].take().unwrap_or_default();
                    if let Some(gi) = groups[i].as_mut() {
                        gi.extend(absorbed);
                    }
                    for k in 0..n {
                        if k != i && k != j {
                            let merged = linkage_sum[i][k] + linkage_sum[j][k];
                            linkage_sum[i][k] = merged;
                            linkage_sum[k][i] = merged;
                        }
                    }
                }
                _ => break,
            }
        }

        groups.into_iter().flatten().collect()
    }

    fn build_cluster(&self, mut members: Vec<RecordId>, scores: &HashMap<CandidatePair, f64>) -> Cluster {
        members.sort_unstable();
        let scores_per_record: Vec<f64> = if members.len() == 1 {
            vec![1.0]
        } else {
            members
                .iter()
                .map(|&id| {
                    let total: f64 = members
                        .iter()
                        .filter(|&&other| other != id)
                        .map(|&other| pair_score(id, other, scores))
                        .sum();
                    total / (members.len() - 1) as f64
                })
                .collect()
        };
        let coherence = calculate_coherence_score(&members, scores, self.config.match_threshold);
        Cluster {
            record_ids: members,
            scores: scores_per_record,
            coherence,
        }
    }
}

/// Blocks, compares, scores and partitions in one call with fresh working state.
pub fn partition(
    records: &RecordSet,
    model: &ClassifierModel,
    fields: &FieldSet,
    index: &BlockingIndex,
    config: ClusterConfig,
) -> Result<Vec<Cluster>> {
    let cancel = CancellationFlag::new();
    let (candidates, _) = index.index(records)?;
    let comparator = Comparator::new(fields.clone());
    let mut cache = FeatureCache::new(candidates.len().max(1));
    let scored = score_candidates(&candidates, records, &comparator, &mut cache, model, &cancel, None)?;
    let partitioner = Partitioner::new(config);
    let (clusters, _) = partitioner.cluster(records, &scored, |pair| {
        Ok(model.predict(&cache.get_pair_features(&comparator, records, pair)?))
    })?;
    Ok(clusters)
}

fn graph_components(graph: &UnGraph<RecordId, f64>) -> Vec<Vec<RecordId>> {
    let mut visited = vec![false; graph.node_count()];
    let mut components = Vec::new();

    for node_idx in graph.node_indices() {
        if visited[node_idx.index()] {
            continue;
        }
        let mut component = Vec::new();
        let mut stack = vec![node_idx];
        while let Some(current) = stack.pop() {
            if visited[current.index()] {
                continue;
            }
            visited[current.index()] = true;
            component.push(graph[current]);
            for neighbor in graph.neighbors(current) {
                if !visited[neighbor.index()] {
                    stack.push(neighbor);
                }
            }
        }
        components.push(component);
    }
    components
}

fn pair_score(a: RecordId, b: RecordId, scores: &HashMap<CandidatePair, f64>) -> f64 {
    scores.get(&CandidatePair::new(a, b)).copied().unwrap_or(0.0)
}

fn fill_missing_scores<F>(
    members: &[RecordId],
    scores: &mut HashMap<CandidatePair, f64>,
    score_missing: &mut F,
) -> Result<()>
where
    F: FnMut(&CandidatePair) -> Result<f64>,
{
    for (i, &a) in members.iter().enumerate() {
        for &b in &members[i + 1..] {
            let pair = CandidatePair::new(a, b);
            if !scores.contains_key(&pair) {
                let p = score_missing(&pair)?;
                scores.insert(pair, p);
            }
        }
    }
    Ok(())
}

/// Mean probability over distinct pairs drawn from `left` x `right`.
fn mean_pairwise(left: &[RecordId], right: &[RecordId], scores: &HashMap<CandidatePair, f64>) -> f64 {
    let mut total = 0.0;
    let mut count = 0usize;
    for &a in left {
        for &b in right {
            if a < b {
                total += pair_score(a, b, scores);
                count += 1;
            }
        }
    }
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

fn calculate_coherence_score(
    members: &[RecordId],
    scores: &HashMap<CandidatePair, f64>,
    match_threshold: f64,
) -> CoherenceScore {
    if members.len() <= 1 {
        return CoherenceScore {
            cluster_size: members.len(),
            ..Default::default()
        };
    }

    let cluster_size = members.len();
    let possible_edges = cluster_size * (cluster_size - 1) / 2;
    let mut confidences = Vec::with_capacity(possible_edges);
    for (i, &a) in members.iter().enumerate() {
        for &b in &members[i + 1..] {
            confidences.push(pair_score(a, b, scores));
        }
    }

    let total_edges = confidences.iter().filter(|&&c| c >= match_threshold).count();
    let density = total_edges as f64 / possible_edges as f64;
    let average_confidence = confidences.iter().sum::<f64>() / confidences.len() as f64;
    let confidence_variance = confidences
        .iter()
        .map(|&c| (c - average_confidence).powi(2))
        .sum::<f64>()
        / confidences.len() as f64;

    let overall_score = (density * 0.4)
        + (average_confidence * 0.45)
        + ((1.0 - (confidence_variance / (average_confidence + 0.1))).max(0.0) * 0.15);

    CoherenceScore {
        density,
        average_confidence,
        confidence_variance,
        overall_score: overall_score.clamp(0.0, 1.0),
        total_edges,
        cluster_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;
    use std::collections::{BTreeMap, HashSet};

    fn records(n: u64) -> RecordSet {
        (0..n)
            .map(|i| {
                let mut fields = BTreeMap::new();
                fields.insert("name".to_string(), format!("record {}", i));
                Record::new(RecordId(i), fields)
            })
            .collect()
    }

    fn scored(edges: &[(u64, u64, f64)]) -> Vec<(CandidatePair, f64)> {
        edges
            .iter()
            .map(|&(a, b, p)| (CandidatePair::new(RecordId(a), RecordId(b)), p))
            .collect()
    }

    fn no_missing(_: &CandidatePair) -> Result<f64> {
        Ok(0.0)
    }

    fn assert_disjoint_subset(clusters: &[Cluster], records: &RecordSet) {
        let mut seen = HashSet::new();
        for cluster in clusters {
            for id in &cluster.record_ids {
                assert!(records.contains(*id));
                assert!(seen.insert(*id), "record {} in two clusters", id);
            }
        }
    }

    #[test]
    fn test_threshold_components_and_singletons() {
        let records = records(5);
        let partitioner = Partitioner::new(ClusterConfig::default());
        let (clusters, stats) = partitioner
            .cluster(&records, &scored(&[(0, 1, 0.9), (2, 3, 0.8), (1, 2, 0.2)]), no_missing)
            .unwrap();

        let ids: Vec<Vec<u64>> = clusters
            .iter()
            .map(|c| c.record_ids.iter().map(|r| r.0).collect())
            .collect();
        assert_eq!(ids, vec![vec![0, 1], vec![2, 3], vec![4]]);
        assert_eq!(stats.edges_kept, 2);
        assert_eq!(stats.singletons, 1);
        assert_disjoint_subset(&clusters, &records);
        assert!((clusters[0].scores[0] - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_singletons_can_be_excluded() {
        let records = records(4);
        let config = ClusterConfig {
            include_singletons: false,
            ..Default::default()
        };
        let (clusters, _) = Partitioner::new(config)
            .cluster(&records, &scored(&[(0, 1, 0.9)]), no_missing)
            .unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].record_ids, vec![RecordId(0), RecordId(1)]);
    }

    #[test]
    fn test_weak_chain_is_split() {
        // 0-1 and 3-4 are tight pairs joined only through record 2.
        let records = records(5);
        let edges = scored(&[
            (0, 1, 0.95),
            (3, 4, 0.95),
            (1, 2, 0.55),
            (2, 3, 0.55),
        ]);
        let (clusters, stats) = Partitioner::new(ClusterConfig::default())
            .cluster(&records, &edges, no_missing)
            .unwrap();

        assert_eq!(stats.initial_components, 1);
        assert_eq!(stats.components_refined, 1);
        assert!(clusters.iter().any(|c| c.record_ids == vec![RecordId(0), RecordId(1)]));
        assert!(clusters.iter().any(|c| c.record_ids == vec![RecordId(3), RecordId(4)]));
        assert!(!clusters.iter().any(|c| c.contains(RecordId(0)) && c.contains(RecordId(4))));
        assert_disjoint_subset(&clusters, &records);
    }

    #[test]
    fn test_missing_pairs_are_scored_for_cohesion() {
        let records = records(3);
        let edges = scored(&[(0, 1, 0.9), (1, 2, 0.9)]);
        let mut asked = Vec::new();
        let (clusters, _) = Partitioner::new(ClusterConfig::default())
            .cluster(&records, &edges, |pair| {
                asked.push(*pair);
                Ok(0.85)
            })
            .unwrap();
        assert_eq!(asked, vec![CandidatePair::new(RecordId(0), RecordId(2))]);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 3);
        assert!(clusters[0].coherence.density > 0.99);
    }

    #[test]
    fn test_dense_graph_terminates_and_respects_size_cap() {
        let n = 40u64;
        let records = records(n);
        let mut edges = Vec::new();
        for a in 0..n {
            for b in (a + 1)..n {
                edges.push((a, b, 0.6 + ((a + b) % 4) as f64 * 0.1));
            }
        }
        let config = ClusterConfig {
            max_component_size: 10,
            ..Default::default()
        };
        let (clusters, stats) = Partitioner::new(config)
            .cluster(&records, &scored(&edges), no_missing)
            .unwrap();
        assert_eq!(stats.components_split_for_size, 1);
        assert!(clusters.iter().all(|c| c.len() <= 10));
        assert_disjoint_subset(&clusters, &records);
        let total: usize = clusters.iter().map(|c| c.len()).sum();
        assert_eq!(total, n as usize);
    }

    #[test]
    fn test_partition_end_to_end() {
        use crate::blocking::BlockingConfig;
        use crate::learning::{fit_logistic, ClassifierConfig, TrainingExamples};
        use crate::models::FieldDefinition;

        let names = ["Jon Smith", "John Smith", "Unrelated Corp"];
        let records: RecordSet = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let mut fields = BTreeMap::new();
                fields.insert("name".to_string(), name.to_string());
                Record::new(RecordId(i as u64), fields)
            })
            .collect();
        let fields = FieldSet::new(vec![FieldDefinition::string("name")]);
        let comparator = Comparator::new(fields.clone());
        let features = |a: u64, b: u64| {
            comparator
                .compare_pair(&records, &CandidatePair::new(RecordId(a), RecordId(b)))
                .unwrap()
        };
        let examples = TrainingExamples {
            matches: vec![features(0, 1)],
            distinct: vec![features(0, 2), features(1, 2)],
        };
        let model = fit_logistic(&examples, &ClassifierConfig::default()).unwrap();
        let index = BlockingIndex::new(BlockingConfig::default(), fields.clone());

        let clusters = partition(&records, &model, &fields, &index, ClusterConfig::default()).unwrap();
        let ids: Vec<Vec<u64>> = clusters
            .iter()
            .map(|c| c.record_ids.iter().map(|r| r.0).collect())
            .collect();
        assert_eq!(ids, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn test_score_features_uses_model_and_honors_cancel() {
        use crate::learning::{fit_logistic, ClassifierConfig, TrainingExamples};

        let examples = TrainingExamples {
            matches: vec![vec![0.9], vec![0.95]],
            distinct: vec![vec![0.1], vec![0.05]],
        };
        let model = fit_logistic(&examples, &ClassifierConfig::default()).unwrap();
        let features = vec![
            (CandidatePair::new(RecordId(0), RecordId(1)), vec![0.92]),
            (CandidatePair::new(RecordId(1), RecordId(2)), vec![0.08]),
        ];

        let cancel = CancellationFlag::new();
        let scored = score_features(&features, &model, &cancel, None).unwrap();
        assert_eq!(scored.len(), 2);
        assert_eq!(scored[0].1, model.predict(&[0.92]));
        assert!(scored[0].1 > 0.5 && scored[1].1 < 0.5);

        cancel.cancel();
        assert!(matches!(
            score_features(&features, &model, &cancel, None),
            Err(crate::error::DedupeError::Interrupted(_))
        ));
    }

    #[test]
    fn test_coherence_of_tight_cluster() {
        let mut scores = HashMap::new();
        let ids = [RecordId(0), RecordId(1), RecordId(2)];
        for (i, &a) in ids.iter().enumerate() {
            for &b in &ids[i + 1..] {
                scores.insert(CandidatePair::new(a, b), 0.9);
            }
        }
        let coherence = calculate_coherence_score(&ids, &scores, 0.5);
        assert_eq!(coherence.total_edges, 3);
        assert!((coherence.density - 1.0).abs() < 1e-9);
        assert!((coherence.average_confidence - 0.9).abs() < 1e-9);
        assert!(coherence.overall_score > 0.9);
        assert_eq!(calculate_coherence_score(&ids[..1], &scores, 0.5).overall_score, 0.0);
    }
}
