//! Chemical element symbols, indexed by atomic number - 1.

const SYMBOLS: [&str; 118] = [
    "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", //
    "Na", "Mg", "Al", "Si", "P", "S", "Cl", "Ar", "K", "Ca", //
    "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", //
    "Ga", "Ge", "As", "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", //
    "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd", "In", "Sn", //
    "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", //
    "Pm", "Sm", "Eu", "Gd", "Tb", "Dy", "Ho", "Er", "Tm", "Yb", //
    "Lu", "Hf", "Ta", "W", "Re", "Os", "Ir", "Pt", "Au", "Hg", //
    "Tl", "Pb", "Bi", "Po", "At", "Rn", "Fr", "Ra", "Ac", "Th", //
    "Pa", "U", "Np", "Pu", "Am", "Cm", "Bk", "Cf", "Es", "Fm", //
    "Md", "No", "Lr", "Rf", "Db", "Sg", "Bh", "Hs", "Mt", "Ds", //
    "Rg", "Cn", "Nh", "Fl", "Mc", "Lv", "Ts", "Og",
];

/// Atomic number for a symbol; case-insensitive (`"CO"`, `"co"`, `"Co"`).
pub fn atomic_number(symbol: &str) -> Option<u32> {
    let symbol = symbol.trim();
    SYMBOLS
        .iter()
        .position(|s| s.eq_ignore_ascii_case(symbol))
        .map(|i| i as u32 + 1)
}

/// Conventional spelling of a symbol matched by [`atomic_number`].
pub fn symbol(z: u32) -> Option<&'static str> {
    let i = usize::try_from(z).ok()?.checked_sub(1)?;
    SYMBOLS.get(i).copied()
}

/// `Z·10000 + A·10 + state`, the identity used in activation output.
pub fn zai(z: u32, mass_number: u16, state: u8) -> u32 {
    z * 10_000 + u32::from(mass_number) * 10 + u32::from(state)
}
