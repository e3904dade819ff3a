//! Parsing for the `cipher[-chainmode[-ivmode[:ivopts]]]` cipher-spec
//! grammar accepted by target construction.

use blockveil_core::CryptError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherSpec {
    pub cipher: String,
    pub chainmode: String,
    pub ivmode: String,
    pub ivopts: Option<String>,
}

impl CipherSpec {
    /// Parses `spec`, applying the defaulting rule: if no chainmode is
    /// given, or chainmode is `"plain"` with no ivmode, chainmode becomes
    /// `"cbc"` and ivmode becomes `"plain"`. For any other chainmode, an
    /// ivmode is required unless the chainmode is `"ecb"`.
    pub fn parse(spec: &str) -> Result<Self, CryptError> {
        let mut parts = spec.splitn(3, '-');
        let cipher = parts.next().filter(|s| !s.is_empty()).ok_or(CryptError::Invalid)?.to_string();
        let chainmode_part = parts.next();
        let ivmode_part = parts.next();

        let (chainmode, ivmode_raw) = match (chainmode_part, ivmode_part) {
            (None, _) => ("cbc".to_string(), None),
            (Some("plain"), None) => ("cbc".to_string(), Some("plain")),
            (Some(cm), ivm) => (cm.to_string(), ivm),
        };

        if chainmode != "ecb" && ivmode_raw.is_none() {
            return Err(CryptError::Invalid);
        }

        let (ivmode, ivopts) = match ivmode_raw {
            None => ("plain".to_string(), None),
            Some(raw) => match raw.split_once(':') {
                Some((mode, opts)) => (mode.to_string(), Some(opts.to_string())),
                None => (raw.to_string(), None),
            },
        };

        if blockveil_core::IvMode::parse_name(&ivmode).is_none() {
            return Err(CryptError::Invalid);
        }
        if ivmode == "essiv" && ivopts.is_none() {
            return Err(CryptError::Invalid);
        }

        Ok(Self { cipher, chainmode, ivmode, ivopts })
    }

    /// The cipher name passed to the backend: `"chainmode(cipher)"`.
    pub fn backend_name(&self) -> String {
        format!("{}({})", self.chainmode, self.cipher)
    }

    /// Reconstructs the canonical spec string for status output:
    /// `cipher-chainmode[-ivmode]`. Essiv's `:hashname` suffix is part of
    /// the ivmode segment, not appended separately, to match the grammar
    /// this was parsed from.
    pub fn canonical(&self) -> String {
        match &self.ivopts {
            Some(opts) => format!("{}-{}-{}:{}", self.cipher, self.chainmode, self.ivmode, opts),
            None => format!("{}-{}-{}", self.cipher, self.chainmode, self.ivmode),
        }
    }
}
