use std::io::Write;

use crate::{group::SurfaceGroup, layout::BindingTable};

///Writes a human readable dump of `bt`. `name` is the stage name.
pub fn print_binding_table<W: Write>(w: &mut W, name: &str, bt: &BindingTable) -> std::io::Result<()> {
    let mut total = 0;
    let mut compacted = 0;
    for group in SurfaceGroup::ALL {
        let size = bt.size(group);
        total += size;
        if size > 0 {
            compacted += bt.used(group).count_ones();
        }
    }

    if total == 0 {
        return write!(w, "Binding table for {} is empty\n\n", name);
    }

    if total != compacted {
        writeln!(
            w,
            "Binding table for {} (compacted to {} entries from {} entries)",
            name, compacted, total
        )?;
    } else {
        writeln!(w, "Binding table for {} ({} entries)", name, total)?;
    }

    let mut entry = 0;
    for group in SurfaceGroup::ALL {
        let mut mask = bt.used(group);
        while mask != 0 {
            let index = mask.trailing_zeros();
            mask &= mask - 1;
            writeln!(w, "  [{}] {} #{}", entry, group.name(), index)?;
            entry += 1;
        }
    }
    writeln!(w)
}
