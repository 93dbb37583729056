use super::classify::compile_patterns;
use super::registry::{Entity, EntityType};
use super::turns::Turn;
use regex::Regex;
use std::collections::HashMap;

/// A maximal run of consecutive turns attributed to one entity (or none).
#[derive(Debug, Clone)]
pub struct Segment {
    pub entity_id: Option<String>,
    pub turns: Vec<Turn>,
}

/// Classifies individual turns to spec entities and groups contiguous
/// same-entity turns into segments. Unclassified runs are absorbed into a
/// neighbouring classified segment so the segments always cover every turn
/// exactly once.
pub struct TurnEntityClassifier {
    compiled: HashMap<String, Vec<Regex>>,
}

impl TurnEntityClassifier {
    pub fn new() -> Self {
        TurnEntityClassifier {
            compiled: HashMap::new(),
        }
    }

    pub fn classify_turns(&mut self, turns: &[Turn], entities: &[Entity]) -> Vec<Segment> {
        if turns.is_empty() {
            return Vec::new();
        }
        let spec_entities: Vec<&Entity> = entities
            .iter()
            .filter(|e| e.entity_type == EntityType::Spec)
            .collect();
        if spec_entities.is_empty() {
            return vec![Segment {
                entity_id: None,
                turns: turns.to_vec(),
            }];
        }

        let turn_entities: Vec<Option<String>> = turns
            .iter()
            .map(|t| self.classify_turn(t, &spec_entities))
            .collect();

        let raw = group_consecutive(turns, &turn_entities);
        absorb_none_segments(raw)
    }

    /// Path patterns against the tool narrative decide first; text patterns
    /// over prompt + response are the fallback.
    fn classify_turn(&mut self, turn: &Turn, entities: &[&Entity]) -> Option<String> {
        if !turn.tool_narrative.is_empty() {
            for entity in entities {
                for pattern in &entity.path_patterns {
                    if turn.tool_narrative.contains(pattern.trim_end_matches('/')) {
                        return Some(entity.id());
                    }
                }
            }
        }

        let combined = format!("{}\n{}", turn.prompt, turn.response);
        if combined.trim().is_empty() {
            return None;
        }
        for entity in entities {
            let patterns = self.compiled_for(entity);
            if patterns.iter().any(|p| p.is_match(&combined)) {
                return Some(entity.id());
            }
        }
        None
    }

    fn compiled_for(&mut self, entity: &Entity) -> Vec<Regex> {
        let id = entity.id();
        if !self.compiled.contains_key(&id) {
            self.compiled
                .insert(id.clone(), compile_patterns(&entity.text_patterns));
        }
        self.compiled[&id].clone()
    }
}

impl Default for TurnEntityClassifier {
    fn default() -> Self {
        TurnEntityClassifier::new()
    }
}

fn group_consecutive(turns: &[Turn], turn_entities: &[Option<String>]) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    for (turn, entity) in turns.iter().zip(turn_entities) {
        match segments.last_mut() {
            Some(last) if &last.entity_id == entity => last.turns.push(turn.clone()),
            _ => segments.push(Segment {
                entity_id: entity.clone(),
                turns: vec![turn.clone()],
            }),
        }
    }
    segments
}

/// Two passes: a None segment after a classified one joins it; a still
/// leading None segment is prepended to the next classified one. An all-None
/// session stays a single None segment.
fn absorb_none_segments(segments: Vec<Segment>) -> Vec<Segment> {
    if segments.len() <= 1 {
        return segments;
    }

    let mut forward: Vec<Segment> = Vec::new();
    for segment in segments {
        if segment.entity_id.is_some() {
            forward.push(segment);
        } else if let Some(prev) = forward.last_mut().filter(|s| s.entity_id.is_some()) {
            prev.turns.extend(segment.turns);
        } else {
            forward.push(segment);
        }
    }

    let mut out: Vec<Segment> = Vec::new();
    let mut pending: Vec<Turn> = Vec::new();
    for segment in forward {
        if segment.entity_id.is_none() {
            pending.extend(segment.turns);
        } else {
            let mut turns = std::mem::take(&mut pending);
            turns.extend(segment.turns);
            out.push(Segment {
                entity_id: segment.entity_id,
                turns,
            });
        }
    }
    if !pending.is_empty() {
        match out.last_mut() {
            Some(last) => last.turns.extend(pending),
            None => out.push(Segment {
                entity_id: None,
                turns: pending,
            }),
        }
    }

    out
}
