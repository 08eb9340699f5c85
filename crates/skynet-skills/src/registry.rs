use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::Result;
use crate::frontmatter::parse_frontmatter;
use crate::types::{InvocationPolicy, Skill, SkillSource};

/// Holds the merged view of every skill resolved across all source roots.
/// Later sources (by priority) override earlier ones on a name collision.
pub struct SkillRegistry {
    skills: RwLock<HashMap<String, Skill>>,
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self {
            skills: RwLock::new(HashMap::new()),
        }
    }

    /// Re-scan every root and replace the merged view. `roots` must already
    /// be sorted ascending by [`SkillSource`] priority.
    pub fn load_all(&self, roots: &[(SkillSource, PathBuf)]) -> Result<()> {
        let mut sorted = roots.to_vec();
        sorted.sort_by_key(|(source, _)| *source);

        let mut merged = HashMap::new();
        for (source, root) in &sorted {
            for skill in discover_skills_in(root, *source)? {
                merged.insert(skill.name.clone(), skill);
            }
        }
        *self.skills.write().unwrap() = merged;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Skill> {
        self.skills.read().unwrap().get(name).cloned()
    }

    pub fn list(&self) -> Vec<Skill> {
        let mut skills: Vec<Skill> = self.skills.read().unwrap().values().cloned().collect();
        skills.sort_by(|a, b| a.name.cmp(&b.name));
        skills
    }

    pub fn len(&self) -> usize {
        self.skills.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.read().unwrap().is_empty()
    }
}

fn discover_skills_in(root: &Path, source: SkillSource) -> Result<Vec<Skill>> {
    let mut skills = Vec::new();
    if !root.is_dir() {
        return Ok(skills);
    }
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            let skill_md = path.join("SKILL.md");
            if skill_md.is_file() {
                if let Some(skill) = load_skill_file(&skill_md, root, source)? {
                    skills.push(skill);
                }
            }
        } else if path.extension().is_some_and(|e| e == "md") {
            if let Some(skill) = load_skill_file(&path, root, source)? {
                skills.push(skill);
            }
        }
    }
    Ok(skills)
}

fn load_skill_file(path: &Path, base_dir: &Path, source: SkillSource) -> Result<Option<Skill>> {
    let text = fs::read_to_string(path)?;
    let (frontmatter, body) = parse_frontmatter(&text);

    let name = frontmatter.get("name").map(str::to_string).unwrap_or_else(|| {
        path.parent()
            .and_then(Path::file_name)
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    });
    if name.is_empty() {
        return Ok(None);
    }
    let description = frontmatter.get("description").unwrap_or_default().to_string();

    let requires: Vec<String> = frontmatter
        .get("requires")
        .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect())
        .unwrap_or_default();
    let requires_satisfied = requires.iter().all(|r| requirement_satisfied(r));
    let disable_model_invocation = frontmatter.flag("disable-model-invocation");
    // A skill is still callable by explicit user command even when the
    // model is barred from reaching for it on its own; only an unmet
    // `requires` check takes that away too.
    let user_invocable = requires_satisfied;

    Ok(Some(Skill {
        name,
        description,
        file_path: path.to_path_buf(),
        base_dir: base_dir.to_path_buf(),
        source,
        content: body,
        frontmatter: frontmatter.fields.clone(),
        metadata: frontmatter.fields,
        invocation_policy: InvocationPolicy {
            user_invocable,
            disable_model_invocation: disable_model_invocation || !requires_satisfied,
        },
        requires,
    }))
}

/// A requirement is either `env:NAME` (checked against the process
/// environment) or a bare binary name (checked against `PATH`).
fn requirement_satisfied(requirement: &str) -> bool {
    if let Some(var) = requirement.strip_prefix("env:") {
        return std::env::var(var).is_ok();
    }
    binary_on_path(requirement)
}

fn binary_on_path(name: &str) -> bool {
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| {
        let candidate = dir.join(name);
        candidate.is_file()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_skill(dir: &Path, name: &str, frontmatter: &str) {
        let skill_dir = dir.join(name);
        fs::create_dir_all(&skill_dir).unwrap();
        fs::write(skill_dir.join("SKILL.md"), frontmatter).unwrap();
    }

    #[test]
    fn discovers_skill_directories_with_skill_md() {
        let tmp = tempfile::tempdir().unwrap();
        write_skill(tmp.path(), "deploy", "---\nname: deploy\ndescription: ships it\n---\nbody");

        let registry = SkillRegistry::new();
        registry
            .load_all(&[(SkillSource::Workspace, tmp.path().to_path_buf())])
            .unwrap();

        let skill = registry.get("deploy").expect("skill should be registered");
        assert_eq!(skill.description, "ships it");
        assert!(skill.invocable());
    }

    #[test]
    fn higher_priority_source_overrides_lower_on_name_collision() {
        let low = tempfile::tempdir().unwrap();
        let high = tempfile::tempdir().unwrap();
        write_skill(low.path(), "deploy", "---\nname: deploy\ndescription: old\n---\n");
        write_skill(high.path(), "deploy", "---\nname: deploy\ndescription: new\n---\n");

        let registry = SkillRegistry::new();
        registry
            .load_all(&[
                (SkillSource::Workspace, high.path().to_path_buf()),
                (SkillSource::ExtraDir, low.path().to_path_buf()),
            ])
            .unwrap();

        assert_eq!(registry.get("deploy").unwrap().description, "new");
    }

    #[test]
    fn disable_model_invocation_marks_skill_non_invocable_but_listed() {
        let tmp = tempfile::tempdir().unwrap();
        write_skill(
            tmp.path(),
            "hidden",
            "---\nname: hidden\ndescription: d\ndisable-model-invocation: true\n---\n",
        );

        let registry = SkillRegistry::new();
        registry
            .load_all(&[(SkillSource::Bundled, tmp.path().to_path_buf())])
            .unwrap();

        let skill = registry.get("hidden").unwrap();
        assert!(!skill.invocable());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unmet_requires_marks_skill_non_invocable() {
        let tmp = tempfile::tempdir().unwrap();
        write_skill(
            tmp.path(),
            "needs-tool",
            "---\nname: needs-tool\ndescription: d\nrequires: definitely-not-a-real-binary-xyz\n---\n",
        );

        let registry = SkillRegistry::new();
        registry
            .load_all(&[(SkillSource::Bundled, tmp.path().to_path_buf())])
            .unwrap();

        assert!(!registry.get("needs-tool").unwrap().invocable());
    }

    #[test]
    fn loose_markdown_file_without_skill_md_directory_is_discovered() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join("quick-note.md"),
            "---\nname: quick-note\ndescription: a loose skill file\n---\n",
        )
        .unwrap();

        let registry = SkillRegistry::new();
        registry
            .load_all(&[(SkillSource::ExtraDir, tmp.path().to_path_buf())])
            .unwrap();

        assert!(registry.get("quick-note").is_some());
    }
}
