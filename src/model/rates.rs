//! # Rate Assignment
//!
//! Maps a flat search vector into per-node birth and death rates. Branch
//! groups come from a "lambda tree": a tree isomorphic to the phylogeny
//! whose taxon-group ids pick the parameter index for every node. Latent
//! rate clusters multiply each group's rates by K and append a K-simplex of
//! mixture weights.

use crate::data::tree::Phylogeny;
use crate::error::{RafeError, Result};
use crate::model::birthdeath::DeathRate;

/// Birth and death rates of one node (or one node within one cluster).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeRates {
    pub birth: f64,
    pub death: DeathRate,
}

/// Per-node rates decoded from a search vector.
#[derive(Debug, Clone)]
pub struct RateAssignment {
    /// Rates per tree node (cluster 0 when clustering is enabled)
    pub per_node: Vec<NodeRates>,
    /// Cluster rates and weights when K > 1
    pub clusters: Option<ClusterAssignment>,
}

/// Latent-cluster rates: K rate sets per node plus mixture weights.
#[derive(Debug, Clone)]
pub struct ClusterAssignment {
    pub k: usize,
    /// per_node[node][cluster]
    pub per_node: Vec<Vec<NodeRates>>,
    /// K weights; the last is inferred as 1 - sum of the first K-1
    pub weights: Vec<f64>,
}

/// Shape of the search vector.
#[derive(Debug, Clone, Copy)]
pub struct ParamLayout {
    /// Number of branch groups (1 without a lambda tree)
    pub n_groups: usize,
    /// Estimate a death rate per group alongside the birth rate
    pub estimate_death: bool,
    /// Number of latent rate clusters (1 = no clustering)
    pub k: usize,
    /// Pin cluster 0 to birth rate zero (extinction-only cluster)
    pub fix_cluster_zero: bool,
}

impl ParamLayout {
    /// Layout for a plain single- or grouped-rate model.
    pub fn new(n_groups: usize, estimate_death: bool) -> Self {
        Self {
            n_groups,
            estimate_death,
            k: 1,
            fix_cluster_zero: false,
        }
    }

    /// Layout with K latent clusters.
    pub fn clustered(n_groups: usize, k: usize, fix_cluster_zero: bool) -> Self {
        Self {
            n_groups,
            estimate_death: false,
            k,
            fix_cluster_zero,
        }
    }

    /// Birth-rate parameters contributed by each group
    fn per_group(&self) -> usize {
        if self.k > 1 {
            self.k - usize::from(self.fix_cluster_zero)
        } else if self.estimate_death {
            2
        } else {
            1
        }
    }

    /// Total search-vector length
    pub fn n_params(&self) -> usize {
        let weights = if self.k > 1 { self.k - 1 } else { 0 };
        self.n_groups * self.per_group() + weights
    }

    /// Group index of every tree node, taken from the lambda tree by
    /// postorder position (group 0 everywhere without one).
    pub fn node_groups(&self, tree: &Phylogeny, lambda_tree: Option<&Phylogeny>) -> Result<Vec<usize>> {
        let mut groups = vec![0usize; tree.len()];
        let Some(lt) = lambda_tree else {
            return Ok(groups);
        };
        if lt.len() != tree.len() {
            return Err(RafeError::inconsistent(format!(
                "lambda tree has {} nodes but the phylogeny has {}",
                lt.len(),
                tree.len()
            )));
        }
        for (&node, &lnode) in tree.postorder().iter().zip(lt.postorder().iter()) {
            let tag = lt.node(lnode).taxon_group;
            let group = if tag < 0 { 0 } else { tag as usize };
            if group >= self.n_groups {
                return Err(RafeError::inconsistent(format!(
                    "lambda tree group {} exceeds the {} configured groups",
                    group, self.n_groups
                )));
            }
            groups[node] = group;
        }
        Ok(groups)
    }

    /// Decode a search vector into per-node rates.
    pub fn decode(
        &self,
        params: &[f64],
        tree: &Phylogeny,
        lambda_tree: Option<&Phylogeny>,
    ) -> Result<RateAssignment> {
        if params.len() != self.n_params() {
            return Err(RafeError::inconsistent(format!(
                "expected {} parameters, got {}",
                self.n_params(),
                params.len()
            )));
        }
        let groups = self.node_groups(tree, lambda_tree)?;
        let stride = self.per_group();

        if self.k <= 1 {
            let per_node = groups
                .iter()
                .map(|&g| {
                    let base = g * stride;
                    NodeRates {
                        birth: params[base],
                        death: if self.estimate_death {
                            DeathRate::Value(params[base + 1])
                        } else {
                            DeathRate::SameAsBirth
                        },
                    }
                })
                .collect();
            return Ok(RateAssignment {
                per_node,
                clusters: None,
            });
        }

        let cluster_rate = |g: usize, c: usize| -> f64 {
            if c == 0 && self.fix_cluster_zero {
                0.0
            } else {
                params[g * stride + c - usize::from(self.fix_cluster_zero)]
            }
        };

        let per_node_clusters: Vec<Vec<NodeRates>> = groups
            .iter()
            .map(|&g| {
                (0..self.k)
                    .map(|c| NodeRates {
                        birth: cluster_rate(g, c),
                        death: DeathRate::SameAsBirth,
                    })
                    .collect()
            })
            .collect();

        let weight_base = self.n_groups * stride;
        let mut weights: Vec<f64> = params[weight_base..weight_base + self.k - 1].to_vec();
        let used: f64 = weights.iter().sum();
        weights.push(1.0 - used);

        let per_node = per_node_clusters
            .iter()
            .map(|clusters| clusters[0])
            .collect();
        Ok(RateAssignment {
            per_node,
            clusters: Some(ClusterAssignment {
                k: self.k,
                per_node: per_node_clusters,
                weights,
            }),
        })
    }
}

impl RateAssignment {
    /// True when any rate or weight is outside its feasible region; the
    /// objective maps such vectors to +infinity.
    pub fn is_infeasible(&self) -> bool {
        let bad_rate = |r: &NodeRates| {
            r.birth < 0.0
                || match r.death {
                    DeathRate::Value(mu) => mu < 0.0,
                    DeathRate::SameAsBirth => false,
                }
        };
        if self.per_node.iter().any(|r| bad_rate(r)) {
            return true;
        }
        if let Some(clusters) = &self.clusters {
            if clusters.per_node.iter().flatten().any(|r| bad_rate(r)) {
                return true;
            }
            if clusters.weights.iter().any(|&w| !(0.0..=1.0).contains(&w)) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_tree() -> Phylogeny {
        Phylogeny::parse("((a:1,b:1):1,(c:1,d:1):1)").unwrap()
    }

    #[test]
    fn test_single_group_lengths() {
        assert_eq!(ParamLayout::new(1, false).n_params(), 1);
        assert_eq!(ParamLayout::new(1, true).n_params(), 2);
        assert_eq!(ParamLayout::new(3, false).n_params(), 3);
        assert_eq!(ParamLayout::new(2, true).n_params(), 4);
        assert_eq!(ParamLayout::clustered(1, 3, false).n_params(), 5);
        assert_eq!(ParamLayout::clustered(2, 3, true).n_params(), 6);
    }

    #[test]
    fn test_decode_single_lambda() {
        let tree = small_tree();
        let layout = ParamLayout::new(1, false);
        let assignment = layout.decode(&[0.05], &tree, None).unwrap();
        assert_eq!(assignment.per_node.len(), tree.len());
        for rates in &assignment.per_node {
            assert_eq!(rates.birth, 0.05);
            assert_eq!(rates.death, DeathRate::SameAsBirth);
        }
        assert!(assignment.clusters.is_none());
    }

    #[test]
    fn test_decode_lambda_mu() {
        let tree = small_tree();
        let layout = ParamLayout::new(1, true);
        let assignment = layout.decode(&[0.05, 0.01], &tree, None).unwrap();
        for rates in &assignment.per_node {
            assert_eq!(rates.birth, 0.05);
            assert_eq!(rates.death, DeathRate::Value(0.01));
        }
    }

    #[test]
    fn test_decode_with_lambda_tree() {
        let tree = small_tree();
        let lambda_tree = Phylogeny::parse("((a:1[0],b:1[0])[0],(c:1[1],d:1[1])[1])").unwrap();
        let layout = ParamLayout::new(2, false);
        let assignment = layout
            .decode(&[0.05, 0.09], &tree, Some(&lambda_tree))
            .unwrap();

        let a = tree.find("a").unwrap();
        let c = tree.find("c").unwrap();
        assert_eq!(assignment.per_node[a].birth, 0.05);
        assert_eq!(assignment.per_node[c].birth, 0.09);
    }

    #[test]
    fn test_decode_rejects_bad_group() {
        let tree = small_tree();
        let lambda_tree = Phylogeny::parse("((a:1[0],b:1[0])[0],(c:1[5],d:1[1])[1])").unwrap();
        let layout = ParamLayout::new(2, false);
        assert!(layout
            .decode(&[0.05, 0.09], &tree, Some(&lambda_tree))
            .is_err());
    }

    #[test]
    fn test_decode_clusters() {
        let tree = small_tree();
        let layout = ParamLayout::clustered(1, 3, false);
        let assignment = layout
            .decode(&[0.01, 0.02, 0.03, 0.2, 0.3], &tree, None)
            .unwrap();
        let clusters = assignment.clusters.unwrap();
        assert_eq!(clusters.k, 3);
        assert_eq!(clusters.per_node[0][0].birth, 0.01);
        assert_eq!(clusters.per_node[0][2].birth, 0.03);
        let w = &clusters.weights;
        assert_eq!(w.len(), 3);
        assert!((w[2] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_decode_clusters_fix_zero() {
        let tree = small_tree();
        let layout = ParamLayout::clustered(1, 3, true);
        let assignment = layout
            .decode(&[0.02, 0.03, 0.2, 0.3], &tree, None)
            .unwrap();
        let clusters = assignment.clusters.unwrap();
        assert_eq!(clusters.per_node[0][0].birth, 0.0);
        assert_eq!(clusters.per_node[0][1].birth, 0.02);
        assert_eq!(clusters.per_node[0][2].birth, 0.03);
    }

    #[test]
    fn test_infeasible_detection() {
        let tree = small_tree();
        let layout = ParamLayout::new(1, false);
        let good = layout.decode(&[0.05], &tree, None).unwrap();
        assert!(!good.is_infeasible());
        let bad = layout.decode(&[-0.05], &tree, None).unwrap();
        assert!(bad.is_infeasible());

        let layout = ParamLayout::clustered(1, 2, false);
        let bad_weight = layout.decode(&[0.01, 0.02, 1.4], &tree, None).unwrap();
        assert!(bad_weight.is_infeasible());
    }
}
