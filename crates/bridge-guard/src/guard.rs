use crate::error::AccessResult;

/// Confine-or-reject over one kind of resource reference.
///
/// A service picks exactly one implementation when it is configured: the
/// code bridge confines relative paths with [`crate::PathGuard`], the drive
/// playground confines remote references with [`crate::FolderGuard`].
pub trait ResourceGuard: Send + Sync {
    type Candidate: ?Sized;
    type Confined;

    fn confine(&self, candidate: &Self::Candidate) -> AccessResult<Self::Confined>;
}
