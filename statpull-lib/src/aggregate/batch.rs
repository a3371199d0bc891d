use super::{Collection, Keyed};

/// The records one work item produced, merged into shared state under the
/// aggregation lock.
///
/// Implemented for `Vec<R>` and for tuples of up to four `Vec`s of keyed
/// records, with the matching [`Collection`] (or tuple of collections) as
/// merge target.
pub trait Batch: Send + 'static {
    /// The merged, deduplicated collections of a whole run
    type State: Default + Send + 'static;

    /// Insert every novel record into `state`, dropping duplicates.
    ///
    /// Returns the number of records that were inserted.
    fn merge_into(self, state: &mut Self::State) -> usize;
}

impl<R> Batch for Vec<R>
where
    R: Keyed + Send + 'static,
{
    type State = Collection<R>;

    fn merge_into(self, state: &mut Self::State) -> usize {
        let mut inserted = 0;
        for record in self {
            if state.insert(record) {
                inserted += 1;
            }
        }
        inserted
    }
}

macro_rules! impl_batch_for_tuple {
    ($($record:ident => $idx:tt),+) => {
        impl<$($record),+> Batch for ($(Vec<$record>,)+)
        where
            $($record: Keyed + Send + 'static,)+
        {
            type State = ($(Collection<$record>,)+);

            fn merge_into(self, state: &mut Self::State) -> usize {
                0 $(+ self.$idx.merge_into(&mut state.$idx))+
            }
        }
    };
}

impl_batch_for_tuple!(A => 0);
impl_batch_for_tuple!(A => 0, B => 1);
impl_batch_for_tuple!(A => 0, B => 1, C => 2);
impl_batch_for_tuple!(A => 0, B => 1, C => 2, D => 3);
