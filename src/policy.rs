use http::Uri;

pub(crate) const MAX_REDIRECTS: usize = 10;

/// Which redirects the transport follows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RedirectPolicy {
    /// 3xx responses are returned to the caller.
    Never,
    /// Follow redirects except an `https` to `http` downgrade.
    #[default]
    Normal,
    /// Follow every redirect.
    Always,
}

impl RedirectPolicy {
    /// `NEVER` and `ALWAYS` (any case) select their policy, anything else is `NORMAL`.
    pub fn from_config(value: &str) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case("never") {
            Self::Never
        } else if value.eq_ignore_ascii_case("always") {
            Self::Always
        } else {
            Self::Normal
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Never => "NEVER",
            Self::Normal => "NORMAL",
            Self::Always => "ALWAYS",
        }
    }

    pub const fn max_redirects(self) -> usize {
        match self {
            Self::Never => 0,
            Self::Normal | Self::Always => MAX_REDIRECTS,
        }
    }

    pub fn allows(self, from: &Uri, to: &Uri) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::Normal => !is_scheme_downgrade(from, to),
        }
    }
}

fn is_scheme_downgrade(from: &Uri, to: &Uri) -> bool {
    let from_secure = from
        .scheme_str()
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https"));
    let to_secure = to
        .scheme_str()
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https"));
    from_secure && !to_secure
}
