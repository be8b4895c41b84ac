//! Candidate selection.
//!
//! A [`ToolkitSpecFilter`] states what the caller wants: family, version
//! range, components, architecture and family-specific constraints. Filtering
//! is a pure function over scanned candidates; candidates that need narrowing
//! (MSVC toolsets, oneAPI Fortran compilers) come back as new values.
//!
//! The text form accepted by [`ToolkitSpecFilter::from_str`] is
//! `family[@version][+component...][%arch]`, where a component of the form
//! `key=value` sets a family constraint:
//!
//! ```text
//! gcc@>=10+fortran
//! msvc@2019+toolset=v142+winsdk=10.0.19041
//! oneapi@2021.3+mkl+fortran=ifx%x86_64
//! ```

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use miette::Diagnostic;
use thiserror::Error;

use crate::core::candidate::{Arch, CandidateAttributes};
use crate::core::version::VersionError;
use crate::core::{ToolkitCandidate, ToolkitFamily, VersionSpec};

/// Invalid toolkit request. Raised before any scanning happens.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum SpecValidationError {
    #[error("toolkit spec `{input}` is malformed: {message}")]
    #[diagnostic(
        code(kitenv::spec::syntax),
        help("expected `family[@version][+component...][%arch]`, e.g. `gcc@>=10+fortran`")
    )]
    Syntax { input: String, message: String },

    #[error("version range `{spec}` cannot match any version")]
    #[diagnostic(code(kitenv::spec::empty_range))]
    EmptyRange { spec: String },

    #[error("{constraint} constraint given for {}", .family.map_or("an unspecified family".to_string(), |f| format!("family `{}`", f)))]
    #[diagnostic(code(kitenv::spec::constraint_mismatch))]
    ConstraintMismatch {
        constraint: ToolkitFamily,
        family: Option<ToolkitFamily>,
    },

    #[error("component names must not be blank")]
    #[diagnostic(code(kitenv::spec::blank_component))]
    BlankComponent,
}

/// Which Intel Fortran compiler a oneAPI candidate must provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FortranChoice {
    /// `ifx` or `ifort`, preferring `ifx`.
    #[default]
    Any,
    Ifx,
    Ifort,
    /// Do not set up a Fortran compiler.
    None,
}

impl FromStr for FortranChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(FortranChoice::Any),
            "ifx" => Ok(FortranChoice::Ifx),
            "ifort" => Ok(FortranChoice::Ifort),
            "none" => Ok(FortranChoice::None),
            other => Err(format!(
                "unknown fortran choice `{}` (expected any, ifx, ifort or none)",
                other
            )),
        }
    }
}

impl fmt::Display for FortranChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FortranChoice::Any => "any",
            FortranChoice::Ifx => "ifx",
            FortranChoice::Ifort => "ifort",
            FortranChoice::None => "none",
        };
        write!(f, "{}", s)
    }
}

/// Family-specific requirements.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FamilyConstraint {
    Msvc {
        toolset: Option<VersionSpec>,
        winsdk: Option<VersionSpec>,
    },
    Gcc {
        machine: Option<String>,
    },
    OneApi {
        fortran: FortranChoice,
    },
}

impl FamilyConstraint {
    pub fn family(&self) -> ToolkitFamily {
        match self {
            FamilyConstraint::Msvc { .. } => ToolkitFamily::Msvc,
            FamilyConstraint::Gcc { .. } => ToolkitFamily::Gcc,
            FamilyConstraint::OneApi { .. } => ToolkitFamily::OneApi,
        }
    }
}

/// What a caller asks for. All present predicates must hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ToolkitSpecFilter {
    pub family: Option<ToolkitFamily>,
    pub version: VersionSpec,
    pub components: BTreeSet<String>,
    pub arch: Option<Arch>,
    pub constraint: Option<FamilyConstraint>,
}

impl ToolkitSpecFilter {
    /// Filter matching every candidate of `family`.
    pub fn family(family: ToolkitFamily) -> Self {
        ToolkitSpecFilter {
            family: Some(family),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: VersionSpec) -> Self {
        self.version = version;
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.components.insert(component.into());
        self
    }

    pub fn with_arch(mut self, arch: Arch) -> Self {
        self.arch = Some(arch);
        self
    }

    pub fn with_constraint(mut self, constraint: FamilyConstraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    /// Check the filter for contradictions.
    pub fn validate(&self) -> Result<(), SpecValidationError> {
        if self.version.is_empty_range() {
            return Err(SpecValidationError::EmptyRange {
                spec: self.version.to_string(),
            });
        }
        if self.components.iter().any(|c| c.trim().is_empty()) {
            return Err(SpecValidationError::BlankComponent);
        }
        if let Some(constraint) = &self.constraint {
            if self.family != Some(constraint.family()) {
                return Err(SpecValidationError::ConstraintMismatch {
                    constraint: constraint.family(),
                    family: self.family,
                });
            }
            if let FamilyConstraint::Msvc { toolset, winsdk } = constraint {
                for spec in [toolset, winsdk].into_iter().flatten() {
                    if spec.is_empty_range() {
                        return Err(SpecValidationError::EmptyRange {
                            spec: spec.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply the filter to one candidate, returning the (possibly narrowed)
    /// candidate when it matches.
    pub fn accept(&self, candidate: &ToolkitCandidate) -> Option<ToolkitCandidate> {
        if self.family.is_some_and(|f| f != candidate.family()) {
            return None;
        }
        if !self.version.matches(candidate.version()) {
            return None;
        }
        if !self.components.iter().all(|c| candidate.has_component(c)) {
            return None;
        }
        if self.arch.is_some_and(|a| a != candidate.arch()) {
            return None;
        }

        match &self.constraint {
            None => Some(candidate.clone()),
            Some(constraint) => apply_constraint(constraint, candidate),
        }
    }
}

fn apply_constraint(
    constraint: &FamilyConstraint,
    candidate: &ToolkitCandidate,
) -> Option<ToolkitCandidate> {
    match (constraint, candidate.attributes()) {
        (FamilyConstraint::Msvc { toolset, winsdk }, CandidateAttributes::Msvc(attrs)) => {
            let mut attrs = attrs.clone();
            if let Some(spec) = toolset {
                attrs.toolsets.retain(|t| spec.matches(&t.version));
                if attrs.toolsets.is_empty() {
                    return None;
                }
            }
            if let Some(spec) = winsdk {
                attrs.sdk_versions.retain(|v| spec.matches(v));
                if attrs.sdk_versions.is_empty() {
                    return None;
                }
            }
            Some(candidate.narrowed(CandidateAttributes::Msvc(attrs)))
        }
        (FamilyConstraint::Gcc { machine }, CandidateAttributes::Gcc(attrs)) => match machine {
            Some(m) if m != &attrs.machine => None,
            _ => Some(candidate.clone()),
        },
        (FamilyConstraint::OneApi { fortran }, CandidateAttributes::OneApi(attrs)) => {
            let mut attrs = attrs.clone();
            match fortran {
                FortranChoice::Any => {
                    if attrs.ifx.is_none() && attrs.ifort.is_none() {
                        return None;
                    }
                }
                FortranChoice::Ifx => {
                    attrs.ifx.as_ref()?;
                    attrs.ifort = None;
                }
                FortranChoice::Ifort => {
                    attrs.ifort.as_ref()?;
                    attrs.ifx = None;
                }
                FortranChoice::None => {
                    attrs.ifx = None;
                    attrs.ifort = None;
                }
            }
            Some(candidate.narrowed(CandidateAttributes::OneApi(attrs)))
        }
        _ => None,
    }
}

/// Candidates matching `spec`, in input order.
pub fn select(candidates: &[ToolkitCandidate], spec: &ToolkitSpecFilter) -> Vec<ToolkitCandidate> {
    candidates.iter().filter_map(|c| spec.accept(c)).collect()
}

/// The single best match: highest version, then most components, then
/// the lexicographically smallest install path.
pub fn select_best(
    candidates: &[ToolkitCandidate],
    spec: &ToolkitSpecFilter,
) -> Option<ToolkitCandidate> {
    select(candidates, spec)
        .into_iter()
        .reduce(|best, next| match rank(&next, &best) {
            Ordering::Greater => next,
            _ => best,
        })
}

fn rank(a: &ToolkitCandidate, b: &ToolkitCandidate) -> Ordering {
    a.version()
        .cmp(b.version())
        .then_with(|| a.components().len().cmp(&b.components().len()))
        .then_with(|| b.root().cmp(a.root()))
}

impl FromStr for ToolkitSpecFilter {
    type Err = SpecValidationError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let syntax = |message: String| SpecValidationError::Syntax {
            input: input.to_string(),
            message,
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(syntax("empty toolkit spec".to_string()));
        }

        let (body, arch) = match trimmed.rsplit_once('%') {
            Some((body, arch)) => (body, Some(arch.parse::<Arch>().map_err(syntax)?)),
            None => (trimmed, None),
        };

        let mut parts = body.split('+');
        let head = parts.next().unwrap_or_default();
        let (family_str, version_str) = match head.split_once('@') {
            Some((f, v)) => (f, Some(v)),
            None => (head, None),
        };
        let family: ToolkitFamily = family_str.parse().map_err(syntax)?;

        let version = match version_str {
            None => VersionSpec::any(),
            Some(v) => VersionSpec::parse(v).map_err(|e| match e {
                VersionError::EmptyRange(spec) => SpecValidationError::EmptyRange { spec },
                other => syntax(other.to_string()),
            })?,
        };

        let mut filter = ToolkitSpecFilter::family(family).with_version(version);
        if let Some(arch) = arch {
            filter = filter.with_arch(arch);
        }

        for part in parts {
            match part.split_once('=') {
                Some((key, value)) => {
                    let constraint = filter.constraint.take();
                    filter.constraint =
                        Some(set_option(family, constraint, key, value).map_err(syntax)?);
                }
                None => {
                    if part.trim().is_empty() {
                        return Err(SpecValidationError::BlankComponent);
                    }
                    filter.components.insert(part.trim().to_string());
                }
            }
        }

        filter.validate()?;
        Ok(filter)
    }
}

fn set_option(
    family: ToolkitFamily,
    current: Option<FamilyConstraint>,
    key: &str,
    value: &str,
) -> Result<FamilyConstraint, String> {
    let parse_spec =
        |v: &str, f: fn(&str) -> Result<VersionSpec, VersionError>| f(v).map_err(|e| e.to_string());

    match (family, key.trim()) {
        (ToolkitFamily::Msvc, "toolset") | (ToolkitFamily::Msvc, "winsdk") => {
            let (mut toolset, mut winsdk) = match current {
                Some(FamilyConstraint::Msvc { toolset, winsdk }) => (toolset, winsdk),
                _ => (None, None),
            };
            if key.trim() == "toolset" {
                toolset = Some(parse_spec(value, VersionSpec::parse_toolset)?);
            } else {
                winsdk = Some(parse_spec(value, VersionSpec::parse)?);
            }
            Ok(FamilyConstraint::Msvc { toolset, winsdk })
        }
        (ToolkitFamily::Gcc, "machine") => Ok(FamilyConstraint::Gcc {
            machine: Some(value.trim().to_string()),
        }),
        (ToolkitFamily::OneApi, "fortran") => Ok(FamilyConstraint::OneApi {
            fortran: value.trim().parse()?,
        }),
        (family, key) => Err(format!("`{}` is not an option of {}", key, family)),
    }
}

impl fmt::Display for ToolkitSpecFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family {
            Some(family) => write!(f, "{}", family)?,
            None => write!(f, "*")?,
        }
        if !self.version.is_any() {
            write!(f, "@{}", self.version)?;
        }
        for component in &self.components {
            write!(f, "+{}", component)?;
        }
        match &self.constraint {
            Some(FamilyConstraint::Msvc { toolset, winsdk }) => {
                if let Some(t) = toolset {
                    write!(f, "+toolset={}", t)?;
                }
                if let Some(w) = winsdk {
                    write!(f, "+winsdk={}", w)?;
                }
            }
            Some(FamilyConstraint::Gcc { machine: Some(m) }) => write!(f, "+machine={}", m)?,
            Some(FamilyConstraint::OneApi { fortran }) => write!(f, "+fortran={}", fortran)?,
            _ => {}
        }
        if let Some(arch) = self.arch {
            write!(f, "%{}", arch)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::candidate::{GccAttributes, MsvcAttributes, OneApiAttributes, Toolset};
    use crate::core::Version;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn gcc(version: &str, root: &str, components: &[&str]) -> ToolkitCandidate {
        ToolkitCandidate::new(
            v(version),
            root,
            Arch::X86_64,
            components.iter().copied(),
            CandidateAttributes::Gcc(GccAttributes {
                machine: "x86_64-linux-gnu".into(),
                bin_dir: PathBuf::from(root).join("bin"),
                c: Some(PathBuf::from(root).join("bin/gcc")),
                cxx: None,
                fortran: None,
            }),
        )
    }

    fn msvc(toolsets: &[&str], sdks: &[&str]) -> ToolkitCandidate {
        ToolkitCandidate::new(
            Version::new([2019]),
            "C:/VS/2019/Professional",
            Arch::X86_64,
            ["vc"],
            CandidateAttributes::Msvc(MsvcAttributes {
                instance_id: "9bfa93d9".into(),
                product_id: "Microsoft.VisualStudio.Product.Professional".into(),
                display_name: "Visual Studio Professional 2019".into(),
                toolsets: toolsets
                    .iter()
                    .map(|t| Toolset {
                        version: v(t),
                        dir: PathBuf::from(t),
                        hosts: vec!["x64".into()],
                        targets: vec!["x64".into()],
                    })
                    .collect(),
                sdk_versions: sdks.iter().map(|s| v(s)).collect(),
                vcvarsall: PathBuf::from("vcvarsall.bat"),
            }),
        )
    }

    fn oneapi(version: &str, ifx: bool, ifort: bool) -> ToolkitCandidate {
        ToolkitCandidate::new(
            v(version),
            "/opt/intel/oneapi",
            Arch::X86_64,
            ["compiler"],
            CandidateAttributes::OneApi(OneApiAttributes {
                scripts: BTreeMap::new(),
                ifx: ifx.then(|| PathBuf::from("/opt/ifx")),
                ifort: ifort.then(|| PathBuf::from("/opt/ifort")),
            }),
        )
    }

    #[test]
    fn test_select_version_range_scenario() {
        let candidates = vec![
            gcc("7.5.0", "/usr", &["c"]),
            gcc("11.2.0", "/opt/gcc-11", &["c"]),
            gcc("12.1.0", "/opt/gcc-12", &["c"]),
        ];
        let spec = ToolkitSpecFilter::family(ToolkitFamily::Gcc)
            .with_version(VersionSpec::between(v("10"), v("12")));

        let selected = select(&candidates, &spec);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].version(), &v("11.2.0"));
    }

    #[test]
    fn test_select_preserves_order() {
        let candidates = vec![
            gcc("12.1.0", "/opt/gcc-12", &["c"]),
            gcc("7.5.0", "/usr", &["c"]),
            gcc("11.2.0", "/opt/gcc-11", &["c"]),
        ];
        let spec = ToolkitSpecFilter::family(ToolkitFamily::Gcc).with_version(VersionSpec::at_least(v("8")));
        let versions: Vec<String> = select(&candidates, &spec)
            .iter()
            .map(|c| c.version().to_string())
            .collect();
        assert_eq!(versions, vec!["12.1.0", "11.2.0"]);
    }

    #[test]
    fn test_empty_components_is_superset() {
        let candidates = vec![
            gcc("11.2.0", "/a", &["c"]),
            gcc("11.2.0", "/b", &["c", "fortran"]),
            gcc("12.1.0", "/c", &["c", "cxx", "fortran"]),
        ];
        let loose = ToolkitSpecFilter::family(ToolkitFamily::Gcc);
        let strict = loose.clone().with_component("fortran");

        let all = select(&candidates, &loose);
        let some = select(&candidates, &strict);
        assert_eq!(all.len(), 3);
        assert_eq!(some.len(), 2);
        assert!(some.iter().all(|c| all.contains(c)));
    }

    #[test]
    fn test_select_best_tie_break() {
        let candidates = vec![
            gcc("11.2.0", "/opt/b", &["c"]),
            gcc("11.2.0", "/opt/a", &["c"]),
            gcc("11.2.0", "/opt/z", &["c", "cxx"]),
            gcc("9.4.0", "/usr", &["c", "cxx", "fortran"]),
        ];
        let spec = ToolkitSpecFilter::family(ToolkitFamily::Gcc);
        let best = select_best(&candidates, &spec).unwrap();
        assert_eq!(best.root(), std::path::Path::new("/opt/z"));

        let best = select_best(&candidates[..2], &spec).unwrap();
        assert_eq!(best.root(), std::path::Path::new("/opt/a"));
    }

    #[test]
    fn test_family_and_arch() {
        let candidates = vec![gcc("11.2.0", "/a", &["c"]), oneapi("2021.3.0", true, false)];
        let spec = ToolkitSpecFilter::family(ToolkitFamily::OneApi);
        assert_eq!(select(&candidates, &spec).len(), 1);

        let spec = ToolkitSpecFilter::default().with_arch(Arch::Aarch64);
        assert!(select(&candidates, &spec).is_empty());
    }

    #[test]
    fn test_msvc_toolset_narrowing() {
        let candidate = msvc(&["14.38.33130", "14.29.30133", "14.28.29910"], &["10.0.22621.0"]);
        let spec: ToolkitSpecFilter = "msvc@2019+toolset=v142".parse().unwrap();

        let narrowed = spec.accept(&candidate).unwrap();
        match narrowed.attributes() {
            CandidateAttributes::Msvc(attrs) => {
                let versions: Vec<String> =
                    attrs.toolsets.iter().map(|t| t.version.to_string()).collect();
                assert_eq!(versions, vec!["14.29.30133", "14.28.29910"]);
            }
            other => panic!("unexpected attributes: {:?}", other),
        }
        assert_eq!(narrowed.id(), candidate.id());

        let none: ToolkitSpecFilter = "msvc+toolset=v141".parse().unwrap();
        assert!(none.accept(&candidate).is_none());

        let sdk: ToolkitSpecFilter = "msvc+winsdk=10.0.19041".parse().unwrap();
        assert!(sdk.accept(&candidate).is_none());
    }

    #[test]
    fn test_oneapi_fortran_constraint() {
        let both = oneapi("2021.3.0", true, true);
        let ifort_only = oneapi("2021.1.0", false, true);
        let neither = oneapi("2023.0.0", false, false);

        let any: ToolkitSpecFilter = "oneapi+fortran=any".parse().unwrap();
        assert!(any.accept(&neither).is_none());
        assert!(any.accept(&ifort_only).is_some());

        let ifx: ToolkitSpecFilter = "oneapi+fortran=ifx".parse().unwrap();
        assert!(ifx.accept(&ifort_only).is_none());
        match ifx.accept(&both).unwrap().attributes() {
            CandidateAttributes::OneApi(attrs) => {
                assert!(attrs.ifx.is_some());
                assert!(attrs.ifort.is_none());
            }
            other => panic!("unexpected attributes: {:?}", other),
        }

        let none: ToolkitSpecFilter = "oneapi+fortran=none".parse().unwrap();
        assert!(none.accept(&neither).is_some());
    }

    #[test]
    fn test_parse_spec_strings() {
        let spec: ToolkitSpecFilter = "gcc@>=10+fortran".parse().unwrap();
        assert_eq!(spec.family, Some(ToolkitFamily::Gcc));
        assert_eq!(spec.version, VersionSpec::at_least(v("10")));
        assert!(spec.components.contains("fortran"));

        let spec: ToolkitSpecFilter = "oneapi@2021.3+mkl%x86_64".parse().unwrap();
        assert_eq!(spec.arch, Some(Arch::X86_64));
        assert!(spec.version.matches(&v("2021.3.0")));
        assert!(!spec.version.matches(&v("2021.4.0")));

        let spec: ToolkitSpecFilter = "gcc+machine=x86_64-w64-mingw32".parse().unwrap();
        assert_eq!(
            spec.constraint,
            Some(FamilyConstraint::Gcc {
                machine: Some("x86_64-w64-mingw32".into())
            })
        );
    }

    #[test]
    fn test_parse_spec_errors() {
        assert!(matches!(
            "clang@12".parse::<ToolkitSpecFilter>(),
            Err(SpecValidationError::Syntax { .. })
        ));
        assert!(matches!(
            "gcc@<=1,>=3".parse::<ToolkitSpecFilter>(),
            Err(SpecValidationError::EmptyRange { .. })
        ));
        assert!(matches!(
            "gcc++fortran".parse::<ToolkitSpecFilter>(),
            Err(SpecValidationError::BlankComponent)
        ));
        assert!(matches!(
            "gcc+fortran=ifx".parse::<ToolkitSpecFilter>(),
            Err(SpecValidationError::Syntax { .. })
        ));
        assert!(matches!(
            "gcc%sparc".parse::<ToolkitSpecFilter>(),
            Err(SpecValidationError::Syntax { .. })
        ));
    }

    #[test]
    fn test_validate_constraint_mismatch() {
        let spec = ToolkitSpecFilter::family(ToolkitFamily::Gcc).with_constraint(FamilyConstraint::OneApi {
            fortran: FortranChoice::Ifx,
        });
        assert!(matches!(
            spec.validate(),
            Err(SpecValidationError::ConstraintMismatch { .. })
        ));

        let spec = ToolkitSpecFilter::family(ToolkitFamily::Gcc)
            .with_version(VersionSpec::between(v("12"), v("10")));
        assert!(matches!(spec.validate(), Err(SpecValidationError::EmptyRange { .. })));

        let spec = ToolkitSpecFilter::family(ToolkitFamily::Gcc).with_component(" ");
        assert_eq!(spec.validate(), Err(SpecValidationError::BlankComponent));
    }

    #[test]
    fn test_display_round_trip() {
        for input in ["gcc@>=10+fortran", "msvc+toolset=v143", "oneapi+mkl+fortran=ifx%x86_64"] {
            let spec: ToolkitSpecFilter = input.parse().unwrap();
            let again: ToolkitSpecFilter = spec.to_string().parse().unwrap();
            assert_eq!(spec, again, "{input}");
        }
    }
}
