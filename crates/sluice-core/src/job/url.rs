use async_trait::async_trait;

use super::{Flow, Handler, Job, JobEnv, JobScope, ParentContext};
use crate::error::AppError;
use crate::message::Kwdict;

/// Prints download URLs instead of fetching them.
pub type UrlJob = Job<UrlHandler>;

impl Job<UrlHandler> {
    /// A top-level URL job that descends into nested sources until
    /// `max_depth` is reached.
    pub fn new(url: &str, parent: Option<&ParentContext>, env: JobEnv, max_depth: u32) -> Result<Self, AppError> {
        Self::with_handler(url, parent, env, UrlHandler::new(1, max_depth))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UrlHandler {
    depth: u32,
    max_depth: u32,
}

impl UrlHandler {
    pub fn new(depth: u32, max_depth: u32) -> Self {
        Self { depth, max_depth }
    }
}

#[async_trait]
impl Handler for UrlHandler {
    async fn handle_url(
        &mut self,
        scope: &JobScope<'_>,
        url: &str,
        _kwdict: &Kwdict,
    ) -> Result<Flow, AppError> {
        scope.env.print(url)?;
        Ok(Flow::Continue(()))
    }

    /// Every URL of the list, fallbacks marked with `| `.
    async fn handle_urllist(
        &mut self,
        scope: &JobScope<'_>,
        urls: &[String],
        _kwdict: &Kwdict,
    ) -> Result<Flow, AppError> {
        for (i, url) in urls.iter().enumerate() {
            if i == 0 {
                scope.env.print(url)?;
            } else {
                scope.env.print(&format!("| {url}"))?;
            }
        }
        Ok(Flow::Continue(()))
    }

    async fn handle_queue(
        &mut self,
        scope: &JobScope<'_>,
        url: &str,
        kwdict: &Kwdict,
    ) -> Result<Flow, AppError> {
        if self.depth >= self.max_depth {
            return self.handle_url(scope, url, kwdict).await;
        }

        let parent = scope.parent_context();
        let handler = UrlHandler::new(self.depth + 1, self.max_depth);
        match UrlJob::with_handler(url, Some(&parent), scope.env.clone(), handler) {
            Ok(mut child) => child.run().await,
            Err(AppError::NoExtractor(_)) => scope.env.write_unsupported(url),
            Err(e) => return Err(e),
        }
        Ok(Flow::Continue(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, kwdict};
    use crate::registry::ExtractorRegistry;
    use crate::testutil::{MockExtractor, MockExtractors, SharedBuffer};
    use serde_json::json;

    fn extractors(child: MockExtractor) -> MockExtractors {
        let parent = MockExtractor::new("parent", vec![
            Message::url("http://p/1", Kwdict::new()),
            Message::queue("child:", kwdict(json!({"chapter": 1}))),
            Message::url_list(["http://p/2", "http://p/2b", "http://p/2c"], Kwdict::new()),
        ]);
        MockExtractors::new()
            .with_script("parent:", parent)
            .with_script("child:", child)
    }

    async fn run(max_depth: u32, child: MockExtractor) -> String {
        let stdout = SharedBuffer::new();
        let env = JobEnv::new(ExtractorRegistry::new().with_factory(extractors(child)))
            .with_stdout(stdout.writer());
        let mut job = UrlJob::new("parent:", None, env, max_depth).unwrap();
        job.run().await;
        stdout.contents()
    }

    #[tokio::test]
    async fn test_depth_one_prints_queue_url() {
        let child = MockExtractor::new("child", vec![Message::url("http://c/1", Kwdict::new())]);
        let out = run(1, child.clone()).await;
        assert_eq!(out, "http://p/1\nchild:\nhttp://p/2\n| http://p/2b\n| http://p/2c\n");
        assert_eq!(child.created(), 0);
    }

    #[tokio::test]
    async fn test_deeper_runs_descend() {
        let child = MockExtractor::new("child", vec![
            Message::url("http://c/1", Kwdict::new()),
            Message::queue("grandchild:", Kwdict::new()),
        ]);
        let out = run(2, child.clone()).await;
        assert_eq!(
            out,
            "http://p/1\nhttp://c/1\ngrandchild:\nhttp://p/2\n| http://p/2b\n| http://p/2c\n"
        );
        assert_eq!(child.created(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_nested_url() {
        let stdout = SharedBuffer::new();
        let unsupported = SharedBuffer::new();
        let parent = MockExtractor::new("parent", vec![Message::queue("nowhere:", Kwdict::new())]);
        let env = JobEnv::new(ExtractorRegistry::new().with_factory(MockExtractors::new().with_script("parent:", parent)))
            .with_stdout(stdout.writer())
            .with_unsupported(Some(unsupported.writer()));
        let mut job = UrlJob::new("parent:", None, env, 3).unwrap();
        job.run().await;
        assert_eq!(stdout.contents(), "");
        assert_eq!(unsupported.contents(), "nowhere:\n");
    }
}
