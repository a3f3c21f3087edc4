//! One report, one spreadsheet application: the refresh session.
//!
//! A [`SapRefresh`] moves through [`SessionState`] as the report is opened,
//! its data source discovered, logged into and refreshed. Calls made out of
//! order fail with [`RefreshError::Precondition`] before touching the host.
//! [`SapRefresh::close`] releases everything whatever state the session is
//! in, and runs on drop if the session still holds the application.

use std::path::{Path, PathBuf};

use crate::context::Context;
use crate::descriptor::{DataSourceDescriptor, SourceDetails};
use crate::engine::{self, CalculationChange, CalculationMode, Optimization};
use crate::error::{RefreshError, Result};
use crate::export;
use crate::host::{ExcelHost, WorkbookId};
use crate::restrictions::{ObservedRestriction, RestrictionCommand, RestrictionRow};
use crate::sap::{self, Credentials};
use crate::timing::timed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    New,
    Opened,
    SourceDiscovered,
    LoggedIn,
    Refreshed,
    Closed,
}

/// Variable or filter as listed by [`SapRefresh::get_variables_list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub value: String,
}

pub struct SapRefresh<'a> {
    ctx: &'a Context,
    state: SessionState,
    app: Option<Box<dyn ExcelHost>>,
    workbook: Option<WorkbookId>,
    filepath: Option<PathBuf>,
    data_source: Option<DataSourceDescriptor>,
    /// Data source the session logs into; the discovered one unless overridden.
    source: Option<String>,
    calc_state_init: Option<CalculationMode>,
    optimized: bool,
    logged_in: bool,
    refreshed: bool,
    data_refreshed: bool,
    variables_filters: Vec<ObservedRestriction>,
}

impl<'a> SapRefresh<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self {
            ctx,
            state: SessionState::New,
            app: None,
            workbook: None,
            filepath: None,
            data_source: None,
            source: None,
            calc_state_init: None,
            optimized: false,
            logged_in: false,
            refreshed: false,
            data_refreshed: false,
            variables_filters: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn is_refreshed(&self) -> bool {
        self.refreshed
    }

    pub fn is_data_refreshed(&self) -> bool {
        self.data_refreshed
    }

    pub fn has_application(&self) -> bool {
        self.app.is_some()
    }

    pub fn data_source(&self) -> Option<&DataSourceDescriptor> {
        self.data_source.as_ref()
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn filepath(&self) -> Option<&Path> {
        self.filepath.as_deref()
    }

    /// Restrictions read by the last [`variables_filters_list`](Self::variables_filters_list).
    pub fn variables_filters(&self) -> &[ObservedRestriction] {
        &self.variables_filters
    }

    fn advance(&mut self, to: SessionState) {
        if to > self.state {
            tracing::debug!("Session {:?} -> {to:?}", self.state);
            self.state = to;
        }
    }

    /// The application, provided the workbook is open.
    fn host(&mut self, operation: &'static str) -> Result<&mut dyn ExcelHost> {
        if !matches!(
            self.state,
            SessionState::Opened
                | SessionState::SourceDiscovered
                | SessionState::LoggedIn
                | SessionState::Refreshed
        ) {
            return Err(RefreshError::precondition(operation, "an open report"));
        }
        match self.app.as_deref_mut() {
            Some(app) => Ok(app),
            None => Err(RefreshError::precondition(operation, "an open report")),
        }
    }

    fn require_source(&self, operation: &'static str) -> Result<String> {
        match (&self.data_source, &self.source) {
            (Some(_), Some(source)) => Ok(source.clone()),
            _ => Err(RefreshError::precondition(operation, "a discovered data source")),
        }
    }

    fn require_logged_in(&self, operation: &'static str) -> Result<String> {
        let source = self.require_source(operation)?;
        if !self.logged_in {
            return Err(RefreshError::precondition(operation, "a logged in session"));
        }
        Ok(source)
    }

    /// Open `path` in a fresh spreadsheet application ready for SAP commands.
    pub fn open_report(&mut self, path: &Path) -> Result<()> {
        if self.state != SessionState::New {
            return Err(RefreshError::precondition("open_report", "a new session"));
        }
        let ctx = self.ctx;
        let settings = &ctx.config.settings;
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .ok_or_else(|| RefreshError::Config(format!("{} is not a file", path.display())))?;

        timed(&format!("open {filename}"), || {
            crate::connectivity::ensure_reachable(
                &settings.ping_host,
                settings.ping_port,
                ctx.connect_timeout,
                &ctx.retries.connect,
            )?;
            engine::kill_stray_processes(ctx.killer.as_ref());

            let app = self.app.insert(engine::open_application(ctx.launcher.as_ref())?);
            engine::toggle_optimization(app.as_mut(), Optimization::Start)?;
            self.optimized = true;

            self.workbook = Some(engine::open_workbook(
                app.as_mut(),
                path,
                &ctx.retries.open_workbook,
            )?);
            engine::ensure_plugin_connected(app.as_mut())?;
            self.calc_state_init = Some(engine::set_calculation_mode(
                app.as_mut(),
                CalculationChange::Manual,
            )?);
            engine::ensure_workbook_active(app.as_mut(), &filename)?;
            Ok::<_, RefreshError>(())
        })?;

        self.filepath = Some(path.to_path_buf());
        self.advance(SessionState::Opened);
        Ok(())
    }

    pub fn calculate(&mut self) -> Result<()> {
        engine::calculate(self.host("calculate")?)
    }

    /// Discover the data source of the open workbook.
    ///
    /// When the add-in macros are unavailable the session kills stray
    /// spreadsheet processes and gives up its handles before returning.
    pub fn get_data_source(&mut self) -> Result<&DataSourceDescriptor> {
        let outcome = engine::discover_data_source(self.host("get_data_source")?);
        match outcome {
            Ok(descriptor) => {
                if self.logged_in && self.source.as_deref() != Some(descriptor.source_id.as_str()) {
                    tracing::info!("Data source is now {}, logon required", descriptor.source_id);
                    self.logged_in = false;
                    self.refreshed = false;
                    self.data_refreshed = false;
                    self.state = SessionState::SourceDiscovered;
                }
                self.source = Some(descriptor.source_id.clone());
                self.advance(SessionState::SourceDiscovered);
                Ok(&*self.data_source.insert(descriptor))
            }
            Err(e @ RefreshError::DataSourceDiscovery(_)) => {
                tracing::error!("{e}");
                engine::kill_stray_processes(self.ctx.killer.as_ref());
                self.release();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Log into `source`, or into the discovered data source when `None`.
    pub fn logon(&mut self, source: Option<&str>) -> Result<()> {
        self.require_source("logon")?;
        if let Some(source) = source.filter(|s| !s.is_empty()) {
            self.source = Some(source.to_string());
        }
        let source = self.require_source("logon")?;
        let ctx = self.ctx;
        let settings = &ctx.config.settings;
        let credentials = Credentials {
            client: &settings.logon_client,
            user: &settings.logon_user,
            password_token: &settings.logon_password,
        };
        sap::logon(
            self.host("logon")?,
            &source,
            credentials,
            &ctx.codec,
            &ctx.retries.logon,
        )?;
        self.logged_in = true;
        self.advance(SessionState::LoggedIn);
        Ok(())
    }

    /// Refresh all data sources of the workbook.
    pub fn refresh(&mut self) -> Result<()> {
        self.require_logged_in("refresh")?;
        timed("refresh", || sap::refresh(self.host("refresh")?))?;
        self.refreshed = true;
        self.advance(SessionState::Refreshed);
        Ok(())
    }

    /// Refresh only the session's data source.
    pub fn refresh_data(&mut self) -> Result<()> {
        let source = self.require_logged_in("refresh_data")?;
        timed(&format!("refresh data {source}"), || {
            sap::refresh_data(self.host("refresh_data")?, &source)
        })?;
        self.data_refreshed = true;
        self.advance(SessionState::Refreshed);
        Ok(())
    }

    /// Fill in data source name, query and system.
    pub fn additional_source_info(&mut self) -> Result<&DataSourceDescriptor> {
        let source = self.require_logged_in("additional_source_info")?;
        let app = self.host("additional_source_info")?;
        let details = SourceDetails {
            data_source_name: sap::source_info(app, &source, "DataSourceName")?,
            query: sap::source_info(app, &source, "QueryTechName")?,
            system: sap::source_info(app, &source, "System")?,
        };
        let descriptor = self
            .data_source
            .as_mut()
            .ok_or_else(|| RefreshError::precondition("additional_source_info", "a discovered data source"))?;
        descriptor.details = Some(details);
        Ok(&*descriptor)
    }

    pub fn get_variables_list(&mut self) -> Result<Vec<Variable>> {
        let source = self.require_source("get_variables_list")?;
        let variables = sap::list_variables(self.host("get_variables_list")?, &source)?;
        Ok(variables
            .into_iter()
            .map(|(name, value)| Variable { name, value })
            .collect())
    }

    /// Current variables and filters with their technical names.
    pub fn variables_filters_list(&mut self) -> Result<&[ObservedRestriction]> {
        let source = self.require_source("variables_filters_list")?;
        let (data_source_name, sheet) = match &self.data_source {
            Some(d) => (d.data_source_name().unwrap_or_default().to_string(), d.sheet.clone()),
            None => return Err(RefreshError::precondition("variables_filters_list", "a discovered data source")),
        };
        let app = self.host("variables_filters_list")?;
        let observed = |command, field: String, field_name: String, value: String| ObservedRestriction {
            command,
            field,
            field_name,
            value,
            data_source: source.clone(),
            data_source_name: data_source_name.clone(),
            data_source_sheet: sheet.clone(),
        };

        let mut rows = Vec::new();
        for (name, value) in sap::list_variables(app, &source)? {
            let field = sap::technical_name(app, &source, &name)?;
            rows.push(observed(RestrictionCommand::SetVariable, field, name, value));
        }

        let dimensions = sap::list_dimensions(app, &source)?;
        for (name, value) in sap::list_filters(app, &source)? {
            if name == "Measures" {
                continue;
            }
            let field = dimensions
                .iter()
                .find(|(_, description)| *description == name)
                .map(|(technical, _)| technical.clone())
                .unwrap_or_default();
            rows.push(observed(RestrictionCommand::SetFilter, field, name, value));
        }

        tracing::info!("Read {} variables and filters from {source}", rows.len());
        self.variables_filters = rows;
        Ok(&self.variables_filters)
    }

    /// Descriptor as key/value pairs.
    pub fn data_source_list(&self) -> Result<Vec<(&'static str, String)>> {
        self.data_source
            .as_ref()
            .map(DataSourceDescriptor::pairs)
            .ok_or_else(|| RefreshError::precondition("data_source_list", "a discovered data source"))
    }

    pub fn is_ds_active(&mut self) -> Result<bool> {
        let source = self.require_source("is_ds_active")?;
        sap::is_data_source_active(self.host("is_ds_active")?, &source)
    }

    pub fn is_connected(&mut self) -> Result<bool> {
        let source = self.require_source("is_connected")?;
        sap::is_connected(self.host("is_connected")?, &source)
    }

    /// Apply filter rows with automatic refresh paused.
    pub fn set_refresh_filters(&mut self, rows: &[RestrictionRow]) -> Result<()> {
        let source = self.require_source("set_refresh_filters")?;
        let app = self.host("set_refresh_filters")?;
        sap::set_refresh_behaviour(app, false)?;
        let applied = rows.iter().try_for_each(|row| {
            sap::set_filter(app, row_source(row, &source), &row.field, &row.value)
        });
        let resumed = sap::set_refresh_behaviour(app, true);
        applied.and(resumed)
    }

    /// Apply variable rows with refresh and variable submission paused.
    pub fn set_refresh_variables(&mut self, rows: &[RestrictionRow]) -> Result<()> {
        let source = self.require_source("set_refresh_variables")?;
        let app = self.host("set_refresh_variables")?;
        sap::set_refresh_behaviour(app, false)?;
        let applied = sap::pause_variable_submit(app, true).and_then(|()| {
            let set = rows.iter().try_for_each(|row| {
                sap::set_variable(app, row_source(row, &source), &row.field, &row.value)
            });
            let submitted = sap::pause_variable_submit(app, false);
            set.and(submitted)
        });
        let resumed = sap::set_refresh_behaviour(app, true);
        applied.and(resumed)
    }

    /// Write the descriptor and the last variables/filters listing next to
    /// the other report information; returns the written path.
    pub fn export_variables_filters(&self) -> Result<PathBuf> {
        let (Some(filepath), Some(descriptor)) = (&self.filepath, &self.data_source) else {
            return Err(RefreshError::precondition(
                "export_variables_filters",
                "a discovered data source",
            ));
        };
        let path = export::information_path(&self.ctx.config.settings.info_directory, filepath);
        export::write_information(&path, descriptor, &self.variables_filters)?;
        Ok(path)
    }

    /// Restore calculation, save and close the workbook, quit the application.
    ///
    /// Every step is attempted even if an earlier one fails; the first
    /// failure is returned. Closing a closed session does nothing.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut app) = self.app.take() else {
            self.state = SessionState::Closed;
            return Ok(());
        };
        let mut first_error = None;
        let mut record = |result: Result<()>| {
            if let Err(e) = result {
                tracing::warn!("While closing: {e}");
                first_error.get_or_insert(e);
            }
        };

        if let Some(mode) = self.calc_state_init.take() {
            record(engine::set_calculation_mode(app.as_mut(), CalculationChange::Restore(mode)).map(|_| ()));
        }
        if let Some(workbook) = self.workbook.take() {
            record(engine::close_workbook(app.as_mut(), workbook));
        }
        if std::mem::take(&mut self.optimized) {
            record(engine::toggle_optimization(app.as_mut(), Optimization::Stop));
        }
        record(app.quit().map_err(RefreshError::automation("Quit")));
        drop(app);

        self.state = SessionState::Closed;
        match &self.filepath {
            Some(path) => tracing::info!("Closed {}", path.display()),
            None => tracing::debug!("Closed session"),
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Give up the handles without talking to the application.
    fn release(&mut self) {
        self.app = None;
        self.workbook = None;
        self.calc_state_init = None;
        self.optimized = false;
        self.state = SessionState::Closed;
    }
}

impl Drop for SapRefresh<'_> {
    fn drop(&mut self) {
        if self.app.is_some() {
            if let Err(e) = self.close() {
                tracing::warn!("Closing dropped session failed: {e}");
            }
        }
    }
}

fn row_source<'r>(row: &'r RestrictionRow, fallback: &'r str) -> &'r str {
    if row.data_source.is_empty() {
        fallback
    } else {
        &row.data_source
    }
}

/// Run `f` on a fresh session and close it on every path.
///
/// The error from `f` wins over one from closing.
pub fn with_session<T>(
    ctx: &Context,
    f: impl FnOnce(&mut SapRefresh<'_>) -> Result<T>,
) -> Result<T> {
    let mut session = SapRefresh::new(ctx);
    let outcome = f(&mut session);
    let closed = session.close();
    match (outcome, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_error)) => {
            tracing::warn!("Also failed to close the session: {close_error}");
            Err(e)
        }
    }
}
