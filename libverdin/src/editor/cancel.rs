//! A decorator checking the cancellation signal in front of every
//! editor callback, so a driver never has to.

use super::{DeltaEditor, EditError, WindowHandler};
use crate::{CancelFunc, Revnum};

pub struct CancelEditor<E: DeltaEditor> {
    inner: E,
    cancel: Option<CancelFunc>,
}

impl<E: DeltaEditor> CancelEditor<E> {
    pub fn new(inner: E, cancel: Option<CancelFunc>) -> Self {
        CancelEditor { inner, cancel }
    }

    fn check(&self) -> Result<(), EditError> {
        match self.cancel {
            Some(ref c) if c() => Err(EditError::Cancelled),
            _ => Ok(()),
        }
    }
}

impl<E: DeltaEditor> DeltaEditor for CancelEditor<E> {
    type Dir = E::Dir;
    type File = E::File;

    fn set_target_revision(&mut self, revision: Revnum) -> Result<(), EditError> {
        self.check()?;
        self.inner.set_target_revision(revision)
    }

    fn open_root(&mut self, base_revision: Option<Revnum>) -> Result<Self::Dir, EditError> {
        self.check()?;
        self.inner.open_root(base_revision)
    }

    fn delete_entry(
        &mut self,
        rel_path: &str,
        revision: Option<Revnum>,
        parent: &Self::Dir,
    ) -> Result<(), EditError> {
        self.check()?;
        self.inner.delete_entry(rel_path, revision, parent)
    }

    fn add_directory(
        &mut self,
        rel_path: &str,
        parent: &Self::Dir,
        copyfrom: Option<(String, Revnum)>,
    ) -> Result<Self::Dir, EditError> {
        self.check()?;
        self.inner.add_directory(rel_path, parent, copyfrom)
    }

    fn open_directory(
        &mut self,
        rel_path: &str,
        parent: &Self::Dir,
        base_revision: Option<Revnum>,
    ) -> Result<Self::Dir, EditError> {
        self.check()?;
        self.inner.open_directory(rel_path, parent, base_revision)
    }

    fn change_dir_prop(
        &mut self,
        dir: &Self::Dir,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), EditError> {
        self.check()?;
        self.inner.change_dir_prop(dir, name, value)
    }

    fn close_directory(&mut self, dir: Self::Dir) -> Result<(), EditError> {
        self.check()?;
        self.inner.close_directory(dir)
    }

    fn add_file(
        &mut self,
        rel_path: &str,
        parent: &Self::Dir,
        copyfrom: Option<(String, Revnum)>,
    ) -> Result<Self::File, EditError> {
        self.check()?;
        self.inner.add_file(rel_path, parent, copyfrom)
    }

    fn open_file(
        &mut self,
        rel_path: &str,
        parent: &Self::Dir,
        base_revision: Option<Revnum>,
    ) -> Result<Self::File, EditError> {
        self.check()?;
        self.inner.open_file(rel_path, parent, base_revision)
    }

    fn apply_textdelta(
        &mut self,
        file: &Self::File,
        base_checksum: Option<&str>,
    ) -> Result<Box<dyn WindowHandler>, EditError> {
        self.check()?;
        self.inner.apply_textdelta(file, base_checksum)
    }

    fn change_file_prop(
        &mut self,
        file: &Self::File,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), EditError> {
        self.check()?;
        self.inner.change_file_prop(file, name, value)
    }

    fn close_file(
        &mut self,
        file: Self::File,
        text_checksum: Option<&str>,
    ) -> Result<(), EditError> {
        self.check()?;
        self.inner.close_file(file, text_checksum)
    }

    fn close_edit(self) -> Result<(), EditError> {
        self.check()?;
        self.inner.close_edit()
    }
}
