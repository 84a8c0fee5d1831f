//! Long-running bootloader operations with per-step progress feedback.

use crate::error::Result;
use crate::target_handle::TargetHandle;
use crate::transport::Transport;

/// A device operation yielding progress while it runs.
///
/// Operations are iterators over `Result<usize>` items; every item reports the amount of work
/// completed so far, in the unit [`total`] uses (pages for erasing, bytes for programming).
/// Callers not interested in progress drive the whole operation with [`execute`].
///
/// After the first error the iterator is fused; the device is likely mid-sequence and the
/// operation has to be restarted from scratch.
///
/// [`total`]: #tymethod.total
/// [`execute`]: #method.execute
pub trait Operation: Iterator<Item = Result<usize>> {
    /// Total amount of work in this operation.
    fn total(&self) -> usize;

    /// Runs the operation to completion, discarding progress.
    fn execute(&mut self) -> Result<()> {
        if let Some(Err(error)) = self.last() {
            Err(error)
        } else {
            Ok(())
        }
    }
}

/// Erases the whole application flash region, page by page. Yields the number of pages erased.
pub struct Erase<'a, T: Transport> {
    handle: &'a mut TargetHandle<T>,
    /// Remaining page addresses, popped from the back.
    pages: Vec<u32>,
    count: usize,
    done: bool,
}

impl<T: Transport> Operation for Erase<'_, T> {
    fn total(&self) -> usize {
        self.count
    }
}

impl<T: Transport> Iterator for Erase<'_, T> {
    type Item = Result<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let page = self.pages.pop()?;

        // Return None on the next call to `next` if this was the last page
        if self.pages.is_empty() {
            self.done = true;
        }
        Some(match self.handle.erase_page(page) {
            Ok(()) => Ok(self.count - self.pages.len()),
            Err(error) => {
                // Ensure that the iterator is fused after an error occurs
                self.done = true;
                Err(error)
            }
        })
    }
}

impl<'a, T: Transport> Erase<'a, T> {
    pub(crate) fn application(
        handle: &'a mut TargetHandle<T>,
        application_size: u32,
        page_size: u32,
    ) -> Self {
        // Stored in reverse so pages pop off the back in ascending address order
        let pages: Vec<u32> = (0..application_size)
            .step_by(page_size as usize)
            .rev()
            .collect();
        Self {
            handle,
            done: pages.is_empty(),
            count: pages.len(),
            pages,
        }
    }
}

/// Programs extracted image pages, running the erase-fill-commit sequence for each. Yields the
/// number of bytes written.
pub struct ProgramFlash<'a, T: Transport> {
    handle: &'a mut TargetHandle<T>,
    pages: std::vec::IntoIter<(u32, Vec<u8>)>,
    total: usize,
    written: usize,
    done: bool,
}

impl<T: Transport> Operation for ProgramFlash<'_, T> {
    fn total(&self) -> usize {
        self.total
    }
}

impl<T: Transport> Iterator for ProgramFlash<'_, T> {
    type Item = Result<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if let Some((address, data)) = self.pages.next() {
            Some(match self.handle.program_page(address, &data) {
                Ok(()) => {
                    self.written += data.len();
                    Ok(self.written)
                }
                Err(error) => {
                    self.done = true;
                    Err(error)
                }
            })
        } else {
            self.done = true;
            None
        }
    }
}

impl<'a, T: Transport> ProgramFlash<'a, T> {
    pub(crate) fn new(handle: &'a mut TargetHandle<T>, pages: Vec<(u32, Vec<u8>)>) -> Self {
        let total = pages.iter().map(|(_, data)| data.len()).sum();
        Self {
            handle,
            done: pages.is_empty(),
            total,
            written: 0,
            pages: pages.into_iter(),
        }
    }
}

/// Writes EEPROM image chunks one report at a time. Yields the number of bytes written.
pub struct ProgramEeprom<'a, T: Transport> {
    handle: &'a mut TargetHandle<T>,
    chunks: std::vec::IntoIter<(u32, Vec<u8>)>,
    total: usize,
    written: usize,
    done: bool,
}

impl<T: Transport> Operation for ProgramEeprom<'_, T> {
    fn total(&self) -> usize {
        self.total
    }
}

impl<T: Transport> Iterator for ProgramEeprom<'_, T> {
    type Item = Result<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if let Some((address, chunk)) = self.chunks.next() {
            Some(match self.handle.write_eeprom_chunk(address, &chunk) {
                Ok(()) => {
                    self.written += chunk.len();
                    Ok(self.written)
                }
                Err(error) => {
                    self.done = true;
                    Err(error)
                }
            })
        } else {
            self.done = true;
            None
        }
    }
}

impl<'a, T: Transport> ProgramEeprom<'a, T> {
    pub(crate) fn new(handle: &'a mut TargetHandle<T>, chunks: Vec<(u32, Vec<u8>)>) -> Self {
        let total = chunks.iter().map(|(_, chunk)| chunk.len()).sum();
        Self {
            handle,
            done: chunks.is_empty(),
            total,
            written: 0,
            chunks: chunks.into_iter(),
        }
    }
}
