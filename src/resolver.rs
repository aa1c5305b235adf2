//! Dependency validation and the dependency-wave resolution engine.

use std::collections::{HashMap, HashSet};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::datasources::{DataSourceHelper, DataSourceInfo, RequestView, SetupContext, TemplateValue};
use crate::errors::AppError;

/// Rejects a rule's data sources when a `dependsOn` name doesn't refer
/// to a sibling, or when the dependency graph has a cycle (direct,
/// indirect, or self-loop). Implemented as a transitive-closure
/// fixpoint: each node's dependency set is repeatedly grown with its
/// dependencies' own transitive dependencies until nothing changes,
/// then every node is checked for self-containment. This is
/// order-independent, unlike a single linear pass over the
/// as-configured source list, so it finds cycles of any length
/// regardless of where in the document they're declared.
pub fn validate_dependencies(sources: &HashMap<String, DataSourceInfo>) -> Result<(), AppError> {
    let mut missing = Vec::new();
    for (name, info) in sources {
        for dep in &info.depends_on {
            if !sources.contains_key(dep) {
                missing.push(format!("{name} depends on {dep} which was not found."));
            }
        }
    }
    if !missing.is_empty() {
        missing.sort();
        return Err(AppError::MissingDependency(missing.join("\n")));
    }

    let mut closure: HashMap<String, HashSet<String>> =
        sources.keys().map(|k| (k.clone(), HashSet::new())).collect();

    let mut changed = true;
    while changed {
        changed = false;
        for (name, info) in sources {
            for dep in &info.depends_on {
                let dep_closure = closure.get(dep).cloned().unwrap_or_default();
                let entry = closure.get_mut(name).expect("every source has a closure entry");
                if entry.insert(dep.clone()) {
                    changed = true;
                }
                for transitive in dep_closure {
                    if entry.insert(transitive) {
                        changed = true;
                    }
                }
            }
        }
    }

    let mut cyclic: Vec<String> = closure
        .iter()
        .filter(|(name, deps)| deps.contains(*name))
        .map(|(name, _)| name.clone())
        .collect();
    cyclic.sort();

    if !cyclic.is_empty() {
        return Err(AppError::CircularDependency(cyclic.join(", ")));
    }
    Ok(())
}

/// Evaluates a rule's data-source graph for one request: sources whose
/// dependencies are all satisfied run concurrently in a "wave"; the
/// engine waits for exactly that wave's dispatch count before moving
/// on. `Setup` runs immediately before `GetData` within each source's
/// own wave (not eagerly for the whole graph up front), so a dependent
/// source's `Setup` always observes a `context` containing every
/// completed ancestor.
pub async fn resolve(
    data_sources: &HashMap<String, DataSourceInfo>,
    request: &RequestView,
    cancel: &CancellationToken,
) -> Result<HashMap<String, TemplateValue>, AppError> {
    let mut context = HashMap::new();
    let mut template_namespace = HashMap::new();
    let mut complete: HashSet<String> = HashSet::new();

    while complete.len() < data_sources.len() {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let wave: Vec<&DataSourceInfo> = data_sources
            .values()
            .filter(|ds| !complete.contains(&ds.name))
            .filter(|ds| ds.depends_on.iter().all(|dep| complete.contains(dep)))
            .collect();

        if wave.is_empty() {
            // Unreachable once `validate_dependencies` has run, but a
            // dependency cycle here must not spin the loop forever.
            return Err(AppError::CircularDependency(
                "no data source became ready; dependency graph is unsatisfiable".to_string(),
            ));
        }

        debug!(wave_size = wave.len(), "dispatching resolution wave");

        let (tx, mut rx) = tokio::sync::mpsc::channel(wave.len());
        for ds in &wave {
            let name = ds.name.clone();
            let instance = ds.instance.clone();
            let request = request.clone();
            let context_snapshot = context.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let helper = DataSourceHelper::new(&name, &context_snapshot, &request);
                let setup_ctx = SetupContext {
                    request: &request,
                    context: &context_snapshot,
                    helper: &helper,
                };
                let outcome = async {
                    let outcome = instance.setup(&setup_ctx).await?;
                    let data = outcome.session.get_data().await?;
                    let template_data = outcome.session.get_template_data(&data)?;
                    Ok::<_, AppError>((data, template_data))
                }
                .await;
                let _ = tx.send((name, outcome)).await;
            });
        }
        drop(tx);

        for _ in 0..wave.len() {
            let (name, outcome) = rx
                .recv()
                .await
                .expect("exactly wave.len() dispatches were issued this wave");
            let (data, template_data) = outcome?;
            for (key, value) in template_data {
                template_namespace.insert(format!("{name}_{key}"), value);
            }
            context.insert(name.clone(), data);
            complete.insert(name);
        }
    }

    Ok(template_namespace)
}
