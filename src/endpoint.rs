//! The per-worker state container.

use std::collections::HashMap;

use log::debug;

use crate::error::EndpointError;
use crate::field::FieldContainer;
use crate::tag::{overlay, overlay_json, BaseSystemConfig, SubConfig, SubIndex, SystemConfig, Tag};

/// Constructs a subproblem instance from a fully-resolved system
/// config. The subproblem must expose [`Problem::pair`].
pub trait Problem: Send + 'static {
    type Survey;

    /// Pair this subproblem with its survey geometry. Fails if the
    /// pairing cannot be established (e.g. incompatible geometry).
    fn pair(&mut self, survey: &Self::Survey) -> Result<(), String>;
}

/// A named constructor for an empty field container, mirroring
/// `fieldspec[name]()`.
pub trait FieldSpec<F: FieldContainer> {
    fn construct(&self, name: &str) -> Option<F>;
    fn names(&self) -> Vec<String>;
}

/// A simple [`FieldSpec`] backed by a map of prototypes that get
/// cloned-and-emptied on construction.
#[derive(Clone, Default)]
pub struct PrototypeFieldSpec<F: FieldContainer> {
    prototypes: HashMap<String, F>,
}

impl<F: FieldContainer> PrototypeFieldSpec<F> {
    pub fn new() -> Self {
        Self {
            prototypes: HashMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, prototype: F) -> Self {
        self.prototypes.insert(name.into(), prototype);
        self
    }
}

impl<F: FieldContainer> FieldSpec<F> for PrototypeFieldSpec<F> {
    fn construct(&self, name: &str) -> Option<F> {
        self.prototypes.get(name).map(|p| p.empty_like())
    }

    fn names(&self) -> Vec<String> {
        self.prototypes.keys().cloned().collect()
    }
}

/// State replicated on each worker: local subproblems, local field
/// buffers, reduced global field buffers, and the user-supplied
/// factories needed to populate them.
///
/// Generic over the concrete `Problem`/`Survey`/`FieldContainer` types
/// a caller's physics solver uses. Constructed once per worker at
/// bootstrap and mutated only by its owning worker thread thereafter.
pub struct Endpoint<P, S, F>
where
    F: FieldContainer,
{
    base_system_config: BaseSystemConfig,
    problem_factory: Box<dyn Fn(&SystemConfig) -> P + Send>,
    survey_factory: Box<dyn Fn(&serde_json::Value) -> S + Send>,
    fieldspec: Option<Box<dyn FieldSpec<F> + Send>>,

    local_surveys: HashMap<SubIndex, S>,
    local_problems: HashMap<Tag, P>,
    local_fields: HashMap<String, F>,
    global_fields: HashMap<String, F>,
}

impl<P, S, F> Endpoint<P, S, F>
where
    P: Problem<Survey = S>,
    F: FieldContainer,
{
    pub fn new(
        base_system_config: BaseSystemConfig,
        problem_factory: impl Fn(&SystemConfig) -> P + Send + 'static,
        survey_factory: impl Fn(&serde_json::Value) -> S + Send + 'static,
        fieldspec: Option<Box<dyn FieldSpec<F> + Send>>,
    ) -> Self {
        Self {
            base_system_config,
            problem_factory: Box::new(problem_factory),
            survey_factory: Box::new(survey_factory),
            fieldspec,
            local_surveys: HashMap::new(),
            local_problems: HashMap::new(),
            local_fields: HashMap::new(),
            global_fields: HashMap::new(),
        }
    }

    /// `setupLocalFields(names?)`.
    ///
    /// If `names` is `None`, clears `localFields` entirely and then,
    /// if a fieldspec is configured, constructs empty containers for
    /// every name it knows about. If `names` is `Some`, constructs
    /// empty containers for each listed name without clearing others.
    pub fn setup_local_fields(&mut self, names: Option<&[String]>) -> Result<(), EndpointError> {
        let spec = match &self.fieldspec {
            Some(spec) => spec,
            None => {
                if names.is_none() {
                    self.local_fields.clear();
                    return Ok(());
                }
                return Err(EndpointError::MissingFieldSpec);
            }
        };

        match names {
            None => {
                self.local_fields.clear();
                for name in spec.names() {
                    let field = spec
                        .construct(&name)
                        .expect("name came from spec.names(), must construct");
                    self.local_fields.insert(name, field);
                }
            }
            Some(names) => {
                for name in names {
                    let field = spec
                        .construct(name)
                        .ok_or_else(|| EndpointError::UnknownField(name.clone()))?;
                    self.local_fields.insert(name.clone(), field);
                }
            }
        }

        debug!("setupLocalFields: {} field buffers", self.local_fields.len());
        Ok(())
    }

    /// `setupLocalSurveys(subConfigs)` — idempotent: re-running with
    /// the same `isub` simply rebuilds that survey.
    pub fn setup_local_surveys(&mut self, sub_configs: &HashMap<SubIndex, SystemConfig>) {
        for (isub, config) in sub_configs {
            let geom = overlay_json(self.base_system_config.geom(), config);
            let survey = (self.survey_factory)(&geom);
            self.local_surveys.insert(*isub, survey);
        }
        debug!("setupLocalSurveys: {} surveys registered", self.local_surveys.len());
    }

    /// `setupLocalProblem(subConfig)`.
    pub fn setup_local_problem(&mut self, sub_config: &SubConfig) -> Result<(), EndpointError> {
        if self.local_problems.contains_key(&sub_config.tag) {
            return Err(EndpointError::DuplicateTag(sub_config.tag));
        }

        let survey = self
            .local_surveys
            .get(&sub_config.isub)
            .ok_or(EndpointError::MissingSurvey(sub_config.isub))?;

        let system_config = overlay(&self.base_system_config.without_geom(), &sub_config.overlay);
        let mut problem = (self.problem_factory)(&system_config);
        problem
            .pair(survey)
            .map_err(|e| EndpointError::PairingFailed(sub_config.tag, e))?;

        self.local_problems.insert(sub_config.tag, problem);
        debug!("setupLocalProblem: tag {} registered", sub_config.tag);
        Ok(())
    }

    pub fn tags(&self) -> impl Iterator<Item = &Tag> {
        self.local_problems.keys()
    }

    pub fn has_tag(&self, tag: &Tag) -> bool {
        self.local_problems.contains_key(tag)
    }

    pub fn problem(&self, tag: &Tag) -> Option<&P> {
        self.local_problems.get(tag)
    }

    pub fn problem_mut(&mut self, tag: &Tag) -> Option<&mut P> {
        self.local_problems.get_mut(tag)
    }

    pub fn local_field(&self, name: &str) -> Option<&F> {
        self.local_fields.get(name)
    }

    pub fn local_field_mut(&mut self, name: &str) -> Option<&mut F> {
        self.local_fields.get_mut(name)
    }

    pub fn set_local_field(&mut self, name: impl Into<String>, field: F) {
        self.local_fields.insert(name.into(), field);
    }

    /// Like [`Endpoint::local_field`], but constructs the field from
    /// the configured `fieldspec` on first access if it isn't present
    /// yet, mirroring the Python source's
    /// `if key not in endpoint.localFields: endpoint.localFields[key] = endpoint.fieldspec[key]()`.
    pub fn ensure_local_field(&mut self, name: &str) -> Option<&F> {
        if !self.local_fields.contains_key(name) {
            let constructed = self.fieldspec.as_ref()?.construct(name)?;
            self.local_fields.insert(name.to_string(), constructed);
        }
        self.local_fields.get(name)
    }

    pub fn local_fields_len(&self) -> usize {
        self.local_fields.len()
    }

    pub fn fieldspec_len(&self) -> usize {
        self.fieldspec.as_ref().map(|s| s.names().len()).unwrap_or(0)
    }

    pub fn global_field(&self, name: &str) -> Option<&F> {
        self.global_fields.get(name)
    }

    pub fn set_global_field(&mut self, name: impl Into<String>, field: F) {
        self.global_fields.insert(name.into(), field);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::DenseField;
    use num_complex::Complex64;

    struct DummyProblem {
        paired: bool,
    }

    impl Problem for DummyProblem {
        type Survey = String;

        fn pair(&mut self, _survey: &Self::Survey) -> Result<(), String> {
            self.paired = true;
            Ok(())
        }
    }

    fn base_config() -> BaseSystemConfig {
        let mut cfg = SystemConfig::new();
        cfg.insert("geom".into(), serde_json::json!({"nx": 4}));
        cfg.insert("solver".into(), serde_json::json!("direct"));
        BaseSystemConfig::new(cfg).unwrap()
    }

    fn new_endpoint() -> Endpoint<DummyProblem, String, DenseField> {
        let spec: Box<dyn FieldSpec<DenseField> + Send> = Box::new(
            PrototypeFieldSpec::new()
                .with_field("e", DenseField::scalar(Complex64::new(0.0, 0.0)))
                .with_field("h", DenseField::scalar(Complex64::new(0.0, 0.0))),
        );
        Endpoint::new(
            base_config(),
            |_cfg| DummyProblem { paired: false },
            |geom| geom.to_string(),
            Some(spec),
        )
    }

    #[test]
    fn setup_local_fields_noargs_is_idempotent() {
        let mut ep = new_endpoint();
        ep.setup_local_fields(None).unwrap();
        assert_eq!(ep.local_fields_len(), ep.fieldspec_len());
        ep.setup_local_fields(None).unwrap();
        assert_eq!(ep.local_fields_len(), ep.fieldspec_len());
    }

    #[test]
    fn setup_local_fields_named_does_not_clear_others() {
        let mut ep = new_endpoint();
        ep.setup_local_fields(None).unwrap();
        ep.set_local_field("e", DenseField::scalar(Complex64::new(5.0, 0.0)));
        ep.setup_local_fields(Some(&["h".to_string()])).unwrap();
        assert_eq!(ep.local_field("e").unwrap().data[0], Complex64::new(5.0, 0.0));
    }

    #[test]
    fn setup_local_fields_unknown_name_fails() {
        let mut ep = new_endpoint();
        let err = ep
            .setup_local_fields(Some(&["nope".to_string()]))
            .unwrap_err();
        assert!(matches!(err, EndpointError::UnknownField(_)));
    }

    #[test]
    fn setup_problem_requires_survey_first() {
        let mut ep = new_endpoint();
        let sub = SubConfig {
            isub: 0,
            tag: Tag::new(1, 0),
            overlay: SystemConfig::new(),
        };
        let err = ep.setup_local_problem(&sub).unwrap_err();
        assert!(matches!(err, EndpointError::MissingSurvey(_)));
    }

    #[test]
    fn setup_problem_rejects_duplicate_tag() {
        let mut ep = new_endpoint();
        let mut surveys = HashMap::new();
        surveys.insert(0, SystemConfig::new());
        ep.setup_local_surveys(&surveys);

        let sub = SubConfig {
            isub: 0,
            tag: Tag::new(1, 0),
            overlay: SystemConfig::new(),
        };
        ep.setup_local_problem(&sub).unwrap();
        let err = ep.setup_local_problem(&sub).unwrap_err();
        assert!(matches!(err, EndpointError::DuplicateTag(_)));
        assert!(ep.has_tag(&Tag::new(1, 0)));
    }
}
