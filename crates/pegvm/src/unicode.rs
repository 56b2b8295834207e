//! Unicode class resolution for char-class matchers.
//!
//! A `\p{...}` name resolves against general categories first, then
//! properties, then scripts. Resolution happens at compile time; an
//! unresolvable name fails the compilation.

use unicode_general_category::{get_general_category, GeneralCategory};
use unicode_script::{Script, UnicodeScript};

/// A resolved Unicode class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnicodeClass {
    Categories(&'static [GeneralCategory]),
    Property(fn(char) -> bool),
    Script(Script),
}

impl UnicodeClass {
    #[inline]
    pub fn contains(&self, c: char) -> bool {
        match self {
            UnicodeClass::Categories(set) => set.contains(&get_general_category(c)),
            UnicodeClass::Property(test) => test(c),
            UnicodeClass::Script(script) => c.script() == *script,
        }
    }
}

/// Resolve a class name, or None if it names nothing known.
pub(crate) fn resolve_class(name: &str) -> Option<UnicodeClass> {
    if let Some(set) = category_set(name) {
        return Some(UnicodeClass::Categories(set));
    }
    if let Some(test) = property(name) {
        return Some(UnicodeClass::Property(test));
    }
    Script::from_full_name(name)
        .or_else(|| Script::from_short_name(name))
        .map(UnicodeClass::Script)
}

fn category_set(name: &str) -> Option<&'static [GeneralCategory]> {
    use GeneralCategory::*;
    Some(match name {
        "L" => &[UppercaseLetter, LowercaseLetter, TitlecaseLetter, ModifierLetter, OtherLetter],
        "Lu" => &[UppercaseLetter],
        "Ll" => &[LowercaseLetter],
        "Lt" => &[TitlecaseLetter],
        "Lm" => &[ModifierLetter],
        "Lo" => &[OtherLetter],
        "M" => &[NonspacingMark, SpacingMark, EnclosingMark],
        "Mn" => &[NonspacingMark],
        "Mc" => &[SpacingMark],
        "Me" => &[EnclosingMark],
        "N" => &[DecimalNumber, LetterNumber, OtherNumber],
        "Nd" => &[DecimalNumber],
        "Nl" => &[LetterNumber],
        "No" => &[OtherNumber],
        "P" => &[
            ConnectorPunctuation,
            DashPunctuation,
            OpenPunctuation,
            ClosePunctuation,
            InitialPunctuation,
            FinalPunctuation,
            OtherPunctuation,
        ],
        "Pc" => &[ConnectorPunctuation],
        "Pd" => &[DashPunctuation],
        "Ps" => &[OpenPunctuation],
        "Pe" => &[ClosePunctuation],
        "Pi" => &[InitialPunctuation],
        "Pf" => &[FinalPunctuation],
        "Po" => &[OtherPunctuation],
        "S" => &[MathSymbol, CurrencySymbol, ModifierSymbol, OtherSymbol],
        "Sm" => &[MathSymbol],
        "Sc" => &[CurrencySymbol],
        "Sk" => &[ModifierSymbol],
        "So" => &[OtherSymbol],
        "Z" => &[SpaceSeparator, LineSeparator, ParagraphSeparator],
        "Zs" => &[SpaceSeparator],
        "Zl" => &[LineSeparator],
        "Zp" => &[ParagraphSeparator],
        "C" => &[Control, Format, Surrogate, PrivateUse, Unassigned],
        "Cc" => &[Control],
        "Cf" => &[Format],
        "Cs" => &[Surrogate],
        "Co" => &[PrivateUse],
        "Cn" => &[Unassigned],
        _ => return None,
    })
}

fn property(name: &str) -> Option<fn(char) -> bool> {
    Some(match name {
        "White_Space" => char::is_whitespace as fn(char) -> bool,
        "Alphabetic" => char::is_alphabetic,
        "Uppercase" => char::is_uppercase,
        "Lowercase" => char::is_lowercase,
        _ => return None,
    })
}
