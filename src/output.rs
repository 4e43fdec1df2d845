// ============================================================================
// OUTPUT.RS - Console Output Multiplexing
// ============================================================================
//
// Any thread may write text; exactly one consumer (the console pane or the
// terminal) receives it, and only from the ticker on the control thread.
//
// WRITE PATH:
// Writers append into one shared String behind a mutex. A carriage return
// erases back to the last newline, so progress lines overwrite themselves
// like they would in a terminal.
//
// FLUSH PATH:
// The ticker swaps the buffer out under the mutex, releases it, and hands the
// text to the consumer. Writers never wait for the consumer.
// ============================================================================

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

/// Apply `text` to `target` with carriage-return overwrite semantics.
///
/// A `'\r'` truncates `target` back to (not including) its last newline;
/// every other character is appended.
pub fn apply_overwrite(target: &mut String, text: &str) {
    for ch in text.chars() {
        if ch == '\r' {
            erase_current_line(target);
        } else {
            target.push(ch);
        }
    }
}

fn erase_current_line(target: &mut String) {
    match target.rfind('\n') {
        Some(idx) => target.truncate(idx + 1),
        None => target.clear(),
    }
}

struct PendingText {
    text: String,
    // The last flushed chunk ended mid-line, so the consumer is showing a
    // partial line that a carriage return must reach back into.
    line_open: bool,
}

/// Cloneable, thread-safe write handle.
#[derive(Clone)]
pub struct OutputWriter {
    pending: Arc<Mutex<PendingText>>,
}

impl OutputWriter {
    fn lock(&self) -> MutexGuard<'_, PendingText> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn write(&self, text: &str) {
        let mut pending = self.lock();
        for ch in text.chars() {
            if ch != '\r' {
                pending.text.push(ch);
                continue;
            }
            if pending.text.contains('\n') {
                erase_current_line(&mut pending.text);
            } else {
                pending.text.clear();
                if pending.line_open {
                    pending.text.push('\r');
                }
            }
        }
    }

    /// Write `text` followed by a newline.
    pub fn line(&self, text: &str) {
        let mut owned = String::with_capacity(text.len() + 1);
        owned.push_str(text);
        owned.push('\n');
        self.write(&owned);
    }

    fn take(&self) -> String {
        let mut pending = self.lock();
        let text = std::mem::take(&mut pending.text);
        if !text.is_empty() {
            pending.line_open = !text.ends_with('\n');
        }
        text
    }
}

impl io::Write for OutputWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        OutputWriter::write(self, &String::from_utf8_lossy(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // Delivery is the ticker's job
        Ok(())
    }
}

pub type Consumer = Box<dyn FnMut(&str)>;

/// Owns the consumer side. Lives on the control thread.
pub struct OutputMultiplexer {
    writer: OutputWriter,
    consumer: Option<Consumer>,
}

impl OutputMultiplexer {
    pub fn new() -> Self {
        Self {
            writer: OutputWriter {
                pending: Arc::new(Mutex::new(PendingText {
                    text: String::with_capacity(4096),
                    line_open: false,
                })),
            },
            consumer: None,
        }
    }

    pub fn writer(&self) -> OutputWriter {
        self.writer.clone()
    }

    /// Register the single consumer, replacing any previous one.
    pub fn set_consumer(&mut self, consumer: Consumer) {
        self.consumer = Some(consumer);
    }

    /// Deliver everything written since the last flush.
    ///
    /// Returns false (and makes no consumer call) when nothing was pending.
    /// Text written before a consumer exists is dropped at flush time.
    pub fn flush(&mut self) -> bool {
        let text = self.writer.take();
        if text.is_empty() {
            return false;
        }
        match self.consumer.as_mut() {
            Some(consumer) => {
                consumer(&text);
                true
            }
            None => false,
        }
    }
}

impl Default for OutputMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::rc::Rc;
    use std::thread;

    fn capturing() -> (OutputMultiplexer, Rc<RefCell<Vec<String>>>) {
        let mut mux = OutputMultiplexer::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        mux.set_consumer(Box::new(move |text| sink.borrow_mut().push(text.to_string())));
        (mux, seen)
    }

    #[test]
    fn carriage_return_erases_line() {
        let (mut mux, seen) = capturing();
        mux.writer().write("abc\rXY");
        assert!(mux.flush());
        assert_eq!(seen.borrow().as_slice(), ["XY"]);
    }

    #[test]
    fn carriage_return_keeps_previous_lines() {
        let (mut mux, seen) = capturing();
        mux.writer().write("line1\nli\rne2\n");
        mux.flush();
        assert_eq!(seen.borrow().as_slice(), ["line1\nne2\n"]);
    }

    #[test]
    fn empty_flush_skips_consumer() {
        let (mut mux, seen) = capturing();
        assert!(!mux.flush());
        mux.writer().write("x");
        mux.flush();
        assert!(!mux.flush());
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn carriage_return_after_flush_reaches_consumer() {
        let (mut mux, seen) = capturing();
        let out = mux.writer();
        out.write("progress 10%");
        mux.flush();
        out.write("\rprogress 20%");
        mux.flush();
        assert_eq!(seen.borrow()[1], "\rprogress 20%");

        let mut console = String::new();
        for chunk in seen.borrow().iter() {
            apply_overwrite(&mut console, chunk);
        }
        assert_eq!(console, "progress 20%");
    }

    #[test]
    fn carriage_return_after_complete_line_is_plain() {
        let (mut mux, seen) = capturing();
        let out = mux.writer();
        out.line("done");
        mux.flush();
        out.write("a\rb");
        mux.flush();
        assert_eq!(seen.borrow()[1], "b");
    }

    #[test]
    fn concurrent_writers_lose_nothing() {
        let (mut mux, seen) = capturing();
        let handles: Vec<_> = (0..8u32)
            .map(|t| {
                let out = mux.writer();
                thread::spawn(move || {
                    for i in 0..1000u32 {
                        // CJK block: no control characters, all distinct
                        let ch = char::from_u32(0x4E00 + t * 1000 + i).unwrap();
                        out.write(&ch.to_string());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        mux.flush();

        let delivered: Vec<char> = seen.borrow()[0].chars().collect();
        assert_eq!(delivered.len(), 8000);
        let unique: HashSet<char> = delivered.iter().copied().collect();
        let expected: HashSet<char> =
            (0..8000u32).map(|i| char::from_u32(0x4E00 + i).unwrap()).collect();
        assert_eq!(unique, expected);
    }

    #[test]
    fn io_write_adapter() {
        use std::io::Write;
        let (mut mux, seen) = capturing();
        let mut out = mux.writer();
        writeln!(out, "loaded {} records", 3).unwrap();
        mux.flush();
        assert_eq!(seen.borrow()[0], "loaded 3 records\n");
    }
}
