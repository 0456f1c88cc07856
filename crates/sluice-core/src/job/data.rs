use std::io::{self, Write};
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde_json::ser::{Formatter, PrettyFormatter};
use serde_json::{Value, json};

use super::{Flow, Handler, Job, JobEnv, JobScope, ParentContext};
use crate::error::AppError;
use crate::message::{Kwdict, Message, sorted};

/// Collects every dispatched message and dumps them as one JSON document.
pub struct DataJob<W> {
    job: Job<DataHandler>,
    writer: W,
    ascii: bool,
}

impl<W: Write + Send> DataJob<W> {
    pub fn new(url: &str, parent: Option<&ParentContext>, env: JobEnv, writer: W) -> Result<Self, AppError> {
        let ascii = env
            .config
            .get(&["output", "ascii"])
            .and_then(Value::as_bool)
            .unwrap_or(true);
        Ok(Self {
            job: Job::with_handler(url, parent, env, DataHandler::default())?,
            writer,
            ascii,
        })
    }

    /// Collect all messages, then write the dump.
    ///
    /// An extractor failure becomes the last entry of the dump as
    /// `[error kind, message]`; only writing the dump itself can fail.
    pub async fn run(&mut self) -> Result<(), AppError> {
        match AssertUnwindSafe(self.job.pump()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.job.handler.data.push(json!([e.kind(), e.to_string()])),
            Err(_) => tracing::error!(url = %self.job.info.url, "Extraction aborted, dumping partial data"),
        }

        let data = sorted(&Value::Array(std::mem::take(&mut self.job.handler.data)));
        if self.ascii {
            let mut ser = serde_json::Serializer::with_formatter(&mut self.writer, AsciiFormatter::new());
            data.serialize(&mut ser)?;
        } else {
            serde_json::to_writer_pretty(&mut self.writer, &data)?;
        }
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_writer(self) -> W {
        self.writer
    }
}

#[derive(Debug, Default)]
pub struct DataHandler {
    data: Vec<Value>,
}

impl DataHandler {
    pub fn data(&self) -> &[Value] {
        &self.data
    }
}

fn object(kwdict: &Kwdict) -> Value {
    Value::Object(kwdict.clone())
}

#[async_trait]
impl Handler for DataHandler {
    async fn handle_url(
        &mut self,
        _scope: &JobScope<'_>,
        url: &str,
        kwdict: &Kwdict,
    ) -> Result<Flow, AppError> {
        let tag = Message::url(url, Kwdict::new()).tag();
        self.data.push(json!([tag, url, object(kwdict)]));
        Ok(Flow::Continue(()))
    }

    async fn handle_urllist(
        &mut self,
        _scope: &JobScope<'_>,
        urls: &[String],
        kwdict: &Kwdict,
    ) -> Result<Flow, AppError> {
        let tag = Message::url_list(Vec::<String>::new(), Kwdict::new()).tag();
        self.data.push(json!([tag, urls, object(kwdict)]));
        Ok(Flow::Continue(()))
    }

    async fn handle_directory(&mut self, _scope: &JobScope<'_>, kwdict: &Kwdict) -> Result<Flow, AppError> {
        let tag = Message::directory(Kwdict::new()).tag();
        self.data.push(json!([tag, object(kwdict)]));
        Ok(Flow::Continue(()))
    }

    async fn handle_queue(
        &mut self,
        _scope: &JobScope<'_>,
        url: &str,
        kwdict: &Kwdict,
    ) -> Result<Flow, AppError> {
        let tag = Message::queue(url, Kwdict::new()).tag();
        self.data.push(json!([tag, url, object(kwdict)]));
        Ok(Flow::Continue(()))
    }
}

/// Pretty printer that escapes every non-ASCII character as `\uXXXX`.
struct AsciiFormatter<'a> {
    inner: PrettyFormatter<'a>,
}

impl AsciiFormatter<'_> {
    fn new() -> Self {
        Self {
            inner: PrettyFormatter::new(),
        }
    }
}

impl Formatter for AsciiFormatter<'_> {
    fn write_string_fragment<W: ?Sized + Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        let mut units = [0u16; 2];
        let mut start = 0;
        for (i, c) in fragment.char_indices() {
            if c.is_ascii() {
                continue;
            }
            writer.write_all(fragment[start..i].as_bytes())?;
            for unit in c.encode_utf16(&mut units) {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = i + c.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }

    fn begin_array<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_array(writer)
    }

    fn end_array<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_array(writer)
    }

    fn begin_array_value<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        self.inner.begin_array_value(writer, first)
    }

    fn end_array_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_array_value(writer)
    }

    fn begin_object<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_object(writer)
    }

    fn end_object<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_object(writer)
    }

    fn begin_object_key<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        self.inner.begin_object_key(writer, first)
    }

    fn begin_object_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_object_value(writer)
    }

    fn end_object_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_object_value(writer)
    }
}
