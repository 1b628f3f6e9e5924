//! Approver-name resolution for layer labels
use std::collections::BTreeMap;
use tracing::warn;

pub const REQUESTOR_LAYER: &str = "Requestor";
pub const DEPT_HEAD_LAYER: &str = "Dept. Head";
pub const DIV_HEAD_LAYER: &str = "Div. Head";

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Superior {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub active: bool,
}

/// Who is asking, as supplied by the identity collaborator.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct RequesterContext {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub department: String,
    #[n(2)]
    pub direct_superior: Option<Superior>,
    #[n(3)]
    pub division_head: Option<String>,
}

pub trait ApproverResolver {
    fn resolve_approver(&self, layer: &str, requester: &RequesterContext) -> String;
}

impl<F> ApproverResolver for F
where
    F: Fn(&str, &RequesterContext) -> String,
{
    fn resolve_approver(&self, layer: &str, requester: &RequesterContext) -> String {
        self(layer, requester)
    }
}

/// Resolves hierarchy layers from the requester's org chart and every other
/// label through a team directory, falling back to the label itself.
#[derive(Debug, Clone, Default)]
pub struct OrgChartResolver {
    teams: BTreeMap<String, String>,
}

impl RequesterContext {
    pub fn new(name: impl Into<String>, department: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            department: department.into(),
            direct_superior: None,
            division_head: None,
        }
    }

    pub fn with_superior(mut self, name: impl Into<String>, active: bool) -> Self {
        self.direct_superior = Some(Superior {
            name: name.into(),
            active,
        });
        self
    }

    pub fn with_division_head(mut self, name: impl Into<String>) -> Self {
        self.division_head = Some(name.into());
        self
    }
}

impl OrgChartResolver {
    pub fn new(teams: BTreeMap<String, String>) -> Self {
        Self { teams }
    }

    fn team(&self, layer: &str) -> String {
        self.teams
            .get(layer)
            .cloned()
            .unwrap_or_else(|| layer.to_string())
    }
}

impl ApproverResolver for OrgChartResolver {
    fn resolve_approver(&self, layer: &str, requester: &RequesterContext) -> String {
        match layer {
            REQUESTOR_LAYER => requester.name.clone(),
            DEPT_HEAD_LAYER => match &requester.direct_superior {
                Some(superior) if superior.active => superior.name.clone(),
                Some(superior) => {
                    // inactive superior: escalate one level up
                    let substitute = requester
                        .division_head
                        .clone()
                        .unwrap_or_else(|| self.team(DIV_HEAD_LAYER));
                    warn!(
                        event_name = "kasbon.routing.superior_inactive",
                        requester = %requester.name,
                        superior = %superior.name,
                        substitute = %substitute,
                        "direct superior inactive, routing dept. head step upward"
                    );
                    substitute
                }
                None => self.team(layer),
            },
            DIV_HEAD_LAYER => requester
                .division_head
                .clone()
                .unwrap_or_else(|| self.team(layer)),
            other => self.team(other),
        }
    }
}
