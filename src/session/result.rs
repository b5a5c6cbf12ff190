//! Results and rows demultiplexed from a connection's frame stream.
//!
//! One `Results` stream covers one dispatch. It hands out a `SqlResult` per
//! statement execution; each `SqlResult` reads its rows from the same
//! underlying cursor, so rows are only pulled from the connection when the
//! caller asks for them.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_stream::try_stream;
use futures::lock::Mutex;
use futures::stream::{self, BoxStream, Stream, StreamExt};

use super::handle::Slot;
use crate::db::{Frame, Frames, FromValue, RowMetadata, Value};
use crate::error::{Error, Result};

/// Column selector for `Row::get`: a zero-based index or a column name.
pub trait ColumnIndex {
    fn resolve(&self, metadata: &RowMetadata) -> Result<usize>;
}

impl ColumnIndex for usize {
    fn resolve(&self, metadata: &RowMetadata) -> Result<usize> {
        if *self < metadata.len() {
            Ok(*self)
        } else {
            Err(Error::ColumnNotFound {
                column: self.to_string(),
            })
        }
    }
}

impl ColumnIndex for &str {
    fn resolve(&self, metadata: &RowMetadata) -> Result<usize> {
        metadata.index_of(self).ok_or_else(|| Error::ColumnNotFound {
            column: self.to_string(),
        })
    }
}

impl ColumnIndex for String {
    fn resolve(&self, metadata: &RowMetadata) -> Result<usize> {
        self.as_str().resolve(metadata)
    }
}

/// One row of a result.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
    metadata: Arc<RowMetadata>,
}

impl Row {
    pub fn new(values: Vec<Value>, metadata: Arc<RowMetadata>) -> Self {
        Self { values, metadata }
    }

    /// Read a column as `T`.
    ///
    /// NULL is only accepted when `T` is an `Option`.
    pub fn get<T: FromValue>(&self, column: impl ColumnIndex) -> Result<T> {
        let index = column.resolve(&self.metadata)?;
        let value = self.value_at(index)?;
        T::from_value(value).ok_or_else(|| Error::TypeMismatch {
            column: self.column_name(index),
            expected: T::TYPE_NAME,
            found: value.type_name(),
        })
    }

    pub fn get_value(&self, column: impl ColumnIndex) -> Result<&Value> {
        let index = column.resolve(&self.metadata)?;
        self.value_at(index)
    }

    fn value_at(&self, index: usize) -> Result<&Value> {
        self.values.get(index).ok_or_else(|| Error::ColumnNotFound {
            column: index.to_string(),
        })
    }

    fn column_name(&self, index: usize) -> String {
        self.metadata
            .columns()
            .get(index)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| index.to_string())
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn metadata(&self) -> &RowMetadata {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Read position over the frames of one dispatch.
struct Cursor {
    frames: Frames,
    /// Sequence number of the latest result handed out.
    index: usize,
    /// The latest result still has unread frames.
    open: bool,
    finished: bool,
    /// Held until the frames are exhausted or dropped.
    slot: Option<Slot>,
}

/// A result as it was opened from the frame stream.
struct Opened {
    index: usize,
    metadata: Option<Arc<RowMetadata>>,
    /// Present when the result was complete on arrival.
    rows_updated: Option<Option<u64>>,
}

impl Cursor {
    fn new(frames: Frames, slot: Slot) -> Self {
        Self {
            frames,
            index: 0,
            open: false,
            finished: false,
            slot: Some(slot),
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.open = false;
        self.frames = stream::empty().boxed();
        self.slot = None;
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }
        match self.frames.next().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(err)) => {
                self.finish();
                Err(err)
            }
            None => {
                self.finish();
                Ok(None)
            }
        }
    }

    /// Skip whatever is left of the current result, then open the next.
    async fn advance(&mut self) -> Result<Option<Opened>> {
        while self.open {
            match self.next_frame().await? {
                Some(Frame::Complete { .. }) => self.open = false,
                Some(_) => {}
                None => return Ok(None),
            }
        }

        let frame = match self.next_frame().await? {
            Some(frame) => frame,
            None => return Ok(None),
        };
        self.index += 1;
        match frame {
            Frame::Columns(metadata) => {
                self.open = true;
                Ok(Some(Opened {
                    index: self.index,
                    metadata: Some(metadata),
                    rows_updated: None,
                }))
            }
            Frame::Complete { rows_updated } => Ok(Some(Opened {
                index: self.index,
                metadata: None,
                rows_updated: Some(rows_updated),
            })),
            Frame::Row(_) => {
                self.finish();
                Err(Error::connection("connection sent a row outside of a result"))
            }
        }
    }

    /// Next row of result `index`, or its completion count once exhausted.
    async fn next_row(&mut self, index: usize) -> Result<RowOrEnd> {
        if index != self.index || !self.open {
            return Err(Error::AlreadyConsumed);
        }
        match self.next_frame().await? {
            Some(Frame::Row(values)) => Ok(RowOrEnd::Row(values)),
            Some(Frame::Complete { rows_updated }) => {
                self.open = false;
                Ok(RowOrEnd::End(rows_updated))
            }
            Some(Frame::Columns(_)) => {
                self.finish();
                Err(Error::connection("connection started a result before completing the previous one"))
            }
            None => Err(Error::connection("result ended without completion")),
        }
    }
}

enum RowOrEnd {
    Row(Vec<Value>),
    End(Option<u64>),
}

/// The results of one dispatched statement, in execution order.
///
/// Advancing to the next result discards the unread rows of the previous
/// one. The handle accepts new statements once this stream has ended or
/// has been dropped together with every `SqlResult` it produced.
pub struct Results {
    inner: BoxStream<'static, Result<SqlResult>>,
}

impl Results {
    pub(crate) fn new(frames: Frames, slot: Slot) -> Self {
        let cursor = Arc::new(Mutex::new(Cursor::new(frames, slot)));
        let inner = try_stream! {
            loop {
                let opened = cursor.lock().await.advance().await?;
                match opened {
                    Some(opened) => yield SqlResult::new(cursor.clone(), opened),
                    None => break,
                }
            }
        };
        Self {
            inner: inner.boxed(),
        }
    }
}

impl Stream for Results {
    type Item = Result<SqlResult>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// One statement execution's outcome: rows with metadata, or a plain
/// affected-row count.
pub struct SqlResult {
    cursor: Arc<Mutex<Cursor>>,
    index: usize,
    metadata: Option<Arc<RowMetadata>>,
    rows_updated: Option<Option<u64>>,
    consumed: AtomicBool,
}

impl SqlResult {
    fn new(cursor: Arc<Mutex<Cursor>>, opened: Opened) -> Self {
        Self {
            cursor,
            index: opened.index,
            metadata: opened.metadata,
            rows_updated: opened.rows_updated,
            consumed: AtomicBool::new(false),
        }
    }

    /// Column layout, absent for results without a projection.
    pub fn metadata(&self) -> Option<&RowMetadata> {
        self.metadata.as_deref()
    }

    fn claim(&self) -> Result<()> {
        if self.consumed.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyConsumed);
        }
        Ok(())
    }

    /// Lazily apply `f` to every row as it arrives.
    ///
    /// A result can be consumed once; a second `map` or `rows_updated`
    /// yields `AlreadyConsumed`. Results without a projection map to an
    /// empty stream.
    pub fn map<T, F>(&self, mut f: F) -> impl Stream<Item = Result<T>> + Send + use<T, F>
    where
        F: FnMut(&Row, &RowMetadata) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let claimed = self.claim();
        let cursor = self.cursor.clone();
        let index = self.index;
        let metadata = self.metadata.clone();
        try_stream! {
            claimed?;
            if let Some(metadata) = metadata {
                loop {
                    let next = cursor.lock().await.next_row(index).await?;
                    match next {
                        RowOrEnd::Row(values) => {
                            let row = Row::new(values, metadata.clone());
                            yield f(&row, &metadata)?;
                        }
                        RowOrEnd::End(_) => break,
                    }
                }
            }
        }
    }

    /// Every row, collected.
    pub async fn rows(&self) -> Result<Vec<Row>> {
        use futures::TryStreamExt;
        self.map(|row, _| Ok(row.clone())).try_collect().await
    }

    /// Drain the result and return its affected-row count.
    ///
    /// Plain queries report 0.
    pub async fn rows_updated(&self) -> Result<u64> {
        self.claim()?;
        if let Some(rows_updated) = self.rows_updated {
            return Ok(rows_updated.unwrap_or(0));
        }
        let mut cursor = self.cursor.lock().await;
        loop {
            if let RowOrEnd::End(rows_updated) = cursor.next_row(self.index).await? {
                return Ok(rows_updated.unwrap_or(0));
            }
        }
    }
}

impl std::fmt::Debug for SqlResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlResult")
            .field("index", &self.index)
            .field("metadata", &self.metadata)
            .field("consumed", &self.consumed.load(Ordering::Acquire))
            .finish()
    }
}
