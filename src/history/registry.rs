use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Top-level directory names entities are discovered under.
#[derive(Debug, Clone)]
pub struct EntityDirs {
    pub specs: String,
    pub source: String,
    pub research: String,
    pub knowledge: String,
    pub tools: String,
}

impl Default for EntityDirs {
    fn default() -> Self {
        EntityDirs {
            specs: "specs".into(),
            source: "source".into(),
            research: "research".into(),
            knowledge: "knowledge".into(),
            tools: "tools".into(),
        }
    }
}

impl EntityDirs {
    pub fn all(&self) -> [&str; 5] {
        [
            &self.specs,
            &self.source,
            &self.research,
            &self.knowledge,
            &self.tools,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    Spec,
    Source,
    Research,
    Knowledge,
    Tool,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Spec => "spec",
            EntityType::Source => "source",
            EntityType::Research => "research",
            EntityType::Knowledge => "knowledge",
            EntityType::Tool => "tool",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            EntityType::Spec => "Spec",
            EntityType::Source => "Source",
            EntityType::Research => "Research",
            EntityType::Knowledge => "Knowledge",
            EntityType::Tool => "Tool",
        }
    }
}

/// A project concept the classifier can attribute sessions to.
#[derive(Debug, Clone)]
pub struct Entity {
    pub entity_type: EntityType,
    /// Directory leaf name.
    pub name: String,
    pub display_name: String,
    /// Project-relative directory.
    pub directory: String,
    pub keywords: Vec<String>,
    /// Substring prefixes matched against file paths.
    pub path_patterns: Vec<String>,
    /// Case-insensitive regexes matched against text.
    pub text_patterns: Vec<String>,
}

impl Entity {
    pub fn id(&self) -> String {
        format!("{}:{}", self.entity_type.as_str(), self.name)
    }

    /// Where this entity's session history lives.
    pub fn history_dir(&self) -> String {
        format!("{}/history", self.directory)
    }
}

fn spec_dir_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Z]?\d+)_(.+)$").unwrap())
}

/// Discovers entities from the project tree layout. Spec directories carry a
/// numeric prefix (`P03_…`, `07_…`); the other kinds contribute one entity
/// per immediate subdirectory.
pub struct EntityRegistry {
    project_root: PathBuf,
    dirs: EntityDirs,
}

impl EntityRegistry {
    pub fn new(project_root: impl Into<PathBuf>, dirs: EntityDirs) -> Self {
        EntityRegistry {
            project_root: project_root.into(),
            dirs,
        }
    }

    pub fn discover_all(&self) -> Vec<Entity> {
        let mut entities = self.discover_specs();
        entities.extend(self.discover_subdirs(&self.dirs.source, EntityType::Source));
        entities.extend(self.discover_subdirs(&self.dirs.research, EntityType::Research));
        entities.extend(self.discover_subdirs(&self.dirs.knowledge, EntityType::Knowledge));
        entities.extend(self.discover_subdirs(&self.dirs.tools, EntityType::Tool));
        self.apply_aliases(&mut entities);
        cross_link(&mut entities);
        entities
    }

    fn discover_specs(&self) -> Vec<Entity> {
        let specs_root = self.project_root.join(&self.dirs.specs);
        let mut entities = Vec::new();

        for dir_name in sorted_subdirs(&specs_root) {
            let Some(caps) = spec_dir_re().captures(&dir_name) else {
                continue;
            };
            let num = caps[1].to_string();
            let desc = caps[2].to_string();
            let directory = format!("{}/{}", self.dirs.specs, dir_name);

            let mut keywords = vec![
                dir_name.clone(),
                desc.clone(),
                format!("spec {num}"),
                format!("spec #{num}"),
                format!("project {num}"),
                format!("project #{num}"),
            ];
            keywords.extend(name_parts(&desc));

            let path_patterns = vec![format!("{directory}/"), directory.clone()];
            let text_patterns = vec![
                format!(r"[Ss]pec\s*#?{}\b", regex::escape(&num)),
                format!("{}/{}", self.dirs.specs, regex::escape(&dir_name)),
                format!(r"project\s*#?{}\b", regex::escape(&num)),
            ];

            entities.push(Entity {
                entity_type: EntityType::Spec,
                name: dir_name,
                display_name: format!("Spec {num}: {desc}"),
                directory,
                keywords,
                path_patterns,
                text_patterns,
            });
        }
        entities
    }

    fn discover_subdirs(&self, dir: &str, entity_type: EntityType) -> Vec<Entity> {
        let root = self.project_root.join(dir);
        let mut entities = Vec::new();

        for name in sorted_subdirs(&root) {
            let directory = format!("{dir}/{name}");
            let mut keywords = vec![name.clone()];
            keywords.extend(name_parts(&name));

            entities.push(Entity {
                entity_type,
                display_name: format!("{}: {}", entity_type.label(), name),
                directory: directory.clone(),
                keywords,
                path_patterns: vec![format!("{directory}/"), directory.clone()],
                text_patterns: vec![format!("{dir}/{}", regex::escape(&name))],
                name,
            });
        }
        entities
    }

    /// `aliases.json` at the project root maps current spec directory names
    /// to the names they had before a renumbering, so old transcripts still
    /// classify.
    fn apply_aliases(&self, entities: &mut [Entity]) {
        let path = self.project_root.join("aliases.json");
        let Ok(content) = fs::read_to_string(&path) else {
            return;
        };
        let Ok(aliases) = serde_json::from_str::<BTreeMap<String, Vec<String>>>(&content) else {
            eprintln!("[colligo] ⚠ ignoring malformed {}", path.display());
            return;
        };

        for entity in entities.iter_mut() {
            let Some(old_names) = aliases.get(&entity.name) else {
                continue;
            };
            for old in old_names {
                entity.keywords.push(old.clone());
                entity
                    .path_patterns
                    .push(format!("{}/{old}/", self.dirs.specs));
                entity.path_patterns.push(format!("{}/{old}", self.dirs.specs));
                entity
                    .text_patterns
                    .push(format!("{}/{}", self.dirs.specs, regex::escape(old)));
                if let Some(caps) = spec_dir_re().captures(old) {
                    let old_num = caps[1].to_string();
                    entity.keywords.push(format!("spec {old_num}"));
                    entity.keywords.push(format!("spec #{old_num}"));
                    entity
                        .text_patterns
                        .push(format!(r"[Ss]pec\s*#?{}\b", regex::escape(&old_num)));
                }
            }
        }
    }
}

/// When a spec's keywords mention a source entity by name, the source's
/// patterns are merged into the spec so implementation code reads as
/// evidence for it. One-shot merge at build time; no runtime back-edges.
fn cross_link(entities: &mut Vec<Entity>) {
    let sources: Vec<(String, Vec<String>, Vec<String>)> = entities
        .iter()
        .filter(|e| e.entity_type == EntityType::Source)
        .map(|e| {
            (
                e.name.to_lowercase(),
                e.path_patterns.clone(),
                e.text_patterns.clone(),
            )
        })
        .collect();

    for entity in entities.iter_mut() {
        if entity.entity_type != EntityType::Spec {
            continue;
        }
        let keywords: HashSet<String> =
            entity.keywords.iter().map(|k| k.to_lowercase()).collect();
        for (source_name, path_patterns, text_patterns) in &sources {
            if !keywords.contains(source_name) {
                continue;
            }
            for p in path_patterns {
                if !entity.path_patterns.contains(p) {
                    entity.path_patterns.push(p.clone());
                }
            }
            for t in text_patterns {
                if !entity.text_patterns.contains(t) {
                    entity.text_patterns.push(t.clone());
                }
            }
        }
    }
}

fn sorted_subdirs(root: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|n| !n.starts_with('.') && n != "__pycache__")
        .collect();
    names.sort();
    names
}

/// `_`/`-` fragments longer than 2 chars, for keyword matching.
fn name_parts(name: &str) -> Vec<String> {
    name.split(['_', '-'])
        .filter(|p| p.chars().count() > 2)
        .map(String::from)
        .collect()
}
