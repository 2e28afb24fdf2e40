//! Descriptor table.
//!
//! Slots are indexed by guest-visible descriptor id. An occupied slot's
//! descriptor always carries its own index as `id`; descriptors are never
//! removed, so ids stay stable for the lifetime of the table.

use super::rights::{rights_for, AccessMode};
use super::stream::{
    ConsoleSink, LineSink, LineSource, MemoryFile, StandardInput, StandardOutput, StdinLines,
    Stream,
};
use super::types::{Errno, Filetype, Rights};
use crate::config::StdioFds;
use crate::error::{Result, ShimError};

/// Host-side record behind a guest descriptor.
#[derive(Debug)]
pub struct Descriptor {
    /// Table slot, equal to the guest-visible descriptor number.
    pub id: u32,
    /// Raw host descriptor this entry stands in for.
    pub fd: u32,
    /// Path as the guest sees it.
    pub mapped_path: String,
    /// Path on the host side.
    pub real_path: String,
    /// Descriptor kind.
    pub filetype: Filetype,
    /// Operations allowed on this descriptor.
    pub rights_base: Rights,
    /// Operations allowed on descriptors derived from this one.
    pub rights_inheriting: Rights,
    /// Whether the descriptor was handed to the guest at start-up.
    pub preopen: bool,
    /// Attached stream.
    pub stream: Stream,
}

/// The three standard streams, in table order.
#[derive(Debug)]
pub struct StdioStreams {
    /// Stream for descriptor 0.
    pub stdin: Stream,
    /// Stream for descriptor 1.
    pub stdout: Stream,
    /// Stream for descriptor 2.
    pub stderr: Stream,
}

impl StdioStreams {
    /// Standard streams backed by the given source and sinks.
    pub fn new(
        stdin: impl LineSource + 'static,
        stdout: impl LineSink + 'static,
        stderr: impl LineSink + 'static,
    ) -> Self {
        Self {
            stdin: Stream::Input(StandardInput::new(stdin)),
            stdout: Stream::Output(StandardOutput::new(stdout)),
            stderr: Stream::Output(StandardOutput::new(stderr)),
        }
    }

    /// Standard streams wired to the host console.
    pub fn console() -> Self {
        Self::new(StdinLines, ConsoleSink::Stdout, ConsoleSink::Stderr)
    }
}

/// Growable mapping from descriptor id to [`Descriptor`].
#[derive(Debug)]
pub struct DescriptorTable {
    slots: Vec<Option<Descriptor>>,
    used: usize,
}

impl DescriptorTable {
    /// Create an empty table with `size` slots.
    pub fn new(size: usize) -> Self {
        let mut slots = Vec::with_capacity(size);
        slots.resize_with(size, || None);
        Self { slots, used: 0 }
    }

    /// Create a table holding the standard streams at ids 0, 1 and 2.
    pub fn with_stdio(size: usize, fds: StdioFds, streams: StdioStreams) -> Result<Self> {
        let mut table = Self::new(size);
        table.install_stdio(fds, streams)?;
        Ok(table)
    }

    /// Insert the standard streams.
    ///
    /// Each must land on its fixed slot; anything else means the table was
    /// not in its start-up state and the instance must not run.
    pub fn install_stdio(&mut self, fds: StdioFds, streams: StdioStreams) -> Result<()> {
        self.insert_stdio(fds.stdin, 0, "<stdin>", streams.stdin)?;
        self.insert_stdio(fds.stdout, 1, "<stdout>", streams.stdout)?;
        self.insert_stdio(fds.stderr, 2, "<stderr>", streams.stderr)?;
        Ok(())
    }

    fn insert_stdio(
        &mut self,
        fd: u32,
        expected: u32,
        name: &'static str,
        stream: Stream,
    ) -> Result<()> {
        let filetype = Filetype::CharacterDevice;
        let (base, inheriting) = rights_for(fd, AccessMode::ReadWrite, filetype);
        let id = self
            .insert(fd, name, name, filetype, base, inheriting, false, stream)
            .id;
        if id != expected {
            return Err(ShimError::StdioSlotMismatch {
                name,
                expected,
                actual: id,
            });
        }
        Ok(())
    }

    /// Insert a descriptor.
    ///
    /// Reuses the lowest free slot; when every slot is taken the table
    /// doubles and the entry goes at the old size.
    #[allow(clippy::too_many_arguments)]
    pub fn insert(
        &mut self,
        fd: u32,
        mapped_path: impl Into<String>,
        real_path: impl Into<String>,
        filetype: Filetype,
        rights_base: Rights,
        rights_inheriting: Rights,
        preopen: bool,
        stream: Stream,
    ) -> &Descriptor {
        let index = if self.used >= self.slots.len() {
            let old_size = self.slots.len();
            let new_size = (old_size * 2).max(1);
            self.slots.resize_with(new_size, || None);
            old_size
        } else {
            self.slots
                .iter()
                .position(Option::is_none)
                .unwrap_or(self.slots.len())
        };

        let id = index as u32;
        tracing::debug!(id, fd, ?filetype, "descriptor inserted");
        self.used += 1;
        self.slots[index].insert(Descriptor {
            id,
            fd,
            mapped_path: mapped_path.into(),
            real_path: real_path.into(),
            filetype,
            rights_base,
            rights_inheriting,
            preopen,
            stream,
        })
    }

    /// Insert an in-memory regular file, returning its id.
    pub fn insert_file(
        &mut self,
        name: impl Into<String>,
        contents: impl Into<Vec<u8>>,
        access: AccessMode,
    ) -> u32 {
        let name = name.into();
        let filetype = Filetype::RegularFile;
        let fd = self.slots.len() as u32;
        let (base, inheriting) = rights_for(fd, access, filetype);
        let stream = Stream::File(MemoryFile::new(contents));
        self.insert(fd, name.clone(), name, filetype, base, inheriting, false, stream)
            .id
    }

    /// Look up `id`, requiring the given rights.
    pub fn get(&self, id: u32, base: Rights, inheriting: Rights) -> std::result::Result<&Descriptor, Errno> {
        let entry = self
            .slots
            .get(id as usize)
            .and_then(Option::as_ref)
            .filter(|entry| entry.id == id)
            .ok_or(Errno::Badf)?;
        check_rights(entry, base, inheriting)?;
        Ok(entry)
    }

    /// Mutable variant of [`get`](Self::get), for stream access.
    pub fn get_mut(
        &mut self,
        id: u32,
        base: Rights,
        inheriting: Rights,
    ) -> std::result::Result<&mut Descriptor, Errno> {
        let entry = self
            .slots
            .get_mut(id as usize)
            .and_then(Option::as_mut)
            .filter(|entry| entry.id == id)
            .ok_or(Errno::Badf)?;
        check_rights(entry, base, inheriting)?;
        Ok(entry)
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.used
    }

    /// Whether the table holds no descriptors.
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Occupied descriptors in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.slots.iter().flatten()
    }

    /// Flush every buffered output stream.
    pub fn flush_all(&mut self) {
        for entry in self.slots.iter_mut().flatten() {
            entry.stream.flush();
        }
    }
}

fn check_rights(entry: &Descriptor, base: Rights, inheriting: Rights) -> std::result::Result<(), Errno> {
    if !entry.rights_base.contains(base) || !entry.rights_inheriting.contains(inheriting) {
        return Err(Errno::Notcapable);
    }
    Ok(())
}
