use async_trait::async_trait;
use serde_json::Value;

use super::{Flow, Handler, Job, JobEnv, JobScope, ParentContext};
use crate::error::AppError;
use crate::format::display_value;
use crate::message::Kwdict;

/// Prints the metadata keys available for templates and filters, then stops.
pub type KeywordJob = Job<KeywordHandler>;

impl Job<KeywordHandler> {
    pub fn new(url: &str, parent: Option<&ParentContext>, env: JobEnv) -> Result<Self, AppError> {
        Self::with_handler(url, parent, env, KeywordHandler)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordHandler;

fn print_section(env: &JobEnv, title: &str, kwdict: &Kwdict) -> Result<(), AppError> {
    env.print(title)?;
    env.print(&"-".repeat(title.chars().count()))?;
    for line in keyword_lines(kwdict) {
        env.print(&line)?;
    }
    Ok(())
}

#[async_trait]
impl Handler for KeywordHandler {
    async fn handle_url(
        &mut self,
        scope: &JobScope<'_>,
        _url: &str,
        kwdict: &Kwdict,
    ) -> Result<Flow, AppError> {
        scope.env.print("")?;
        print_section(scope.env, "Keywords for filenames and --filter:", kwdict)?;
        Ok(Flow::Break(()))
    }

    async fn handle_directory(&mut self, scope: &JobScope<'_>, kwdict: &Kwdict) -> Result<Flow, AppError> {
        print_section(scope.env, "Keywords for directory names:", kwdict)?;
        Ok(Flow::Continue(()))
    }

    async fn handle_queue(
        &mut self,
        scope: &JobScope<'_>,
        url: &str,
        kwdict: &Kwdict,
    ) -> Result<Flow, AppError> {
        if kwdict.is_empty() {
            tracing::info!(
                category = %scope.info.category,
                "This extractor delegates work to other extractors and does not provide \
                 any keywords on its own. Try 'sluice -K \"{url}\"' instead."
            );
        } else {
            print_section(scope.env, "Keywords for --chapter-filter:", kwdict)?;
        }

        if scope.extractor.category_transfer() {
            scope.env.print("")?;
            let parent = scope.parent_context();
            match KeywordJob::new(url, Some(&parent), scope.env.clone()) {
                Ok(mut child) => child.run().await,
                Err(AppError::NoExtractor(_)) => scope.env.write_unsupported(url),
                Err(e) => return Err(e),
            }
        }
        Ok(Flow::Break(()))
    }
}

/// Render `kwdict` as key/value lines in key order.
///
/// Nested objects show their key path as `outer[inner]`, lists of objects
/// descend into their first element as `key[][inner]`, and other lists print
/// one `  - item` line per element.
pub fn keyword_lines(kwdict: &Kwdict) -> Vec<String> {
    let mut lines = Vec::new();
    collect_lines(&mut lines, kwdict, "");
    lines
}

fn collect_lines(lines: &mut Vec<String>, kwdict: &Kwdict, prefix: &str) {
    let suffix = if prefix.is_empty() { "" } else { "]" };
    let mut keys: Vec<&String> = kwdict.keys().collect();
    keys.sort();

    for key in keys {
        let name = format!("{prefix}{key}{suffix}");
        match &kwdict[key] {
            Value::Object(map) => collect_lines(lines, map, &format!("{name}[")),
            Value::Array(items) => match items.first() {
                Some(Value::Object(first)) => collect_lines(lines, first, &format!("{name}[][")),
                _ => {
                    lines.push(format!("{name}[]"));
                    lines.extend(items.iter().map(|item| format!("  - {}", display_value(item))));
                }
            },
            value => {
                lines.push(name);
                lines.push(format!("  {}", display_value(value)));
            }
        }
    }
}
