use std::{collections::HashMap, fs, sync::Arc};

use bytes::Bytes;
use iced::{
    executor,
    widget::{self, column, image::Handle, row, text_editor},
    Application, Command, Length, Subscription, Theme,
};
use log::{error, info, warn};
use native_dialog::FileDialog;
use tokio::sync::broadcast::error::RecvError;

use crate::{
    catalog::{CatalogClient, SearchState},
    config::Config,
    counts::Mutation,
    decklist::{self, CardErrorInsight},
    export::ExportFile,
    life::{Counter, LifeCounter, Player},
    models::{Binder, BinderKind, Card, CardEntry},
    reconciler::{Reconciler, Remote, SharedStore},
    store::StoreEvent,
};

pub struct Flags {
    pub config: Config,
    pub store: SharedStore,
}

pub struct App {
    store: SharedStore,
    catalog: CatalogClient,
    decks: Reconciler,
    binders: Reconciler,
    page: Page,
    search: SearchState,
    rename_input: String,
    import_content: text_editor::Content,
    import_output: String,
    detail: Option<CardDetail>,
    image_cache: HashMap<String, Bytes>,
    life: LifeCounter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Decks,
    Binders,
    LifeCounter,
}

impl Page {
    fn kind(self) -> Option<BinderKind> {
        match self {
            Page::Decks => Some(BinderKind::Deck),
            Page::Binders => Some(BinderKind::Collection),
            Page::LifeCounter => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CardDetail {
    name: String,
    images: Vec<String>,
}

type Outcome<T> = Result<T, String>;

#[derive(Debug, Clone)]
pub enum AppMessage {
    ChangePage(Page),
    BindersLoaded(BinderKind, Outcome<Vec<Binder>>),
    CreateBinder(BinderKind),
    BinderCreated(BinderKind, Outcome<Binder>),
    OpenBinder(BinderKind, String),
    EntriesLoaded(BinderKind, String, Outcome<Vec<(String, CardEntry)>>),
    CloseBinder(BinderKind),
    EditRename(String),
    RenameBinder(BinderKind, String),
    DeleteBinder(BinderKind, String),
    ExportBinder(BinderKind, String),
    Exported(Outcome<ExportFile>),
    StoreWritten(&'static str, Outcome<()>),
    Search(String),
    SearchFinished(u64, Outcome<Vec<Card>>),
    AddCard(Card),
    RemoveCard(String),
    Pushed(BinderKind, String, Outcome<Option<CardEntry>>),
    StoreChanged(StoreEvent),
    Resync,
    ShowCard(CardDetail),
    CloseDetail,
    UpdateImageCache(String, Option<Bytes>),
    EditImport(text_editor::Action),
    Import(BinderKind),
    ImportResolved(BinderKind, Vec<(u32, Card)>, Vec<CardErrorInsight>),
    AdjustLife(usize, Counter, i32),
    ResetLife,
}

type AppElement<'a> = iced::Element<'a, AppMessage, Theme, iced::Renderer>;

impl Application for App {
    type Executor = executor::Default;
    type Message = AppMessage;
    type Theme = Theme;
    type Flags = Flags;

    fn new(flags: Self::Flags) -> (Self, iced::Command<Self::Message>) {
        let Flags { config, store } = flags;
        let app = Self {
            catalog: CatalogClient::new(&config.catalog_url, config.search_limit),
            decks: Reconciler::new(Arc::clone(&store), &config.owner, BinderKind::Deck),
            binders: Reconciler::new(Arc::clone(&store), &config.owner, BinderKind::Collection),
            store,
            page: Page::Decks,
            search: SearchState::default(),
            rename_input: String::new(),
            import_content: text_editor::Content::new(),
            import_output: String::new(),
            detail: None,
            image_cache: HashMap::new(),
            life: LifeCounter::default(),
        };
        let load = Command::batch([
            load_binders(app.decks.remote()),
            load_binders(app.binders.remote()),
        ]);
        (app, load)
    }

    fn title(&self) -> String {
        let open = self
            .page
            .kind()
            .and_then(|kind| self.reconciler(kind).selected());
        match open {
            Some(binder) => format!("BoardState - {}", binder.name),
            None => "BoardState".to_owned(),
        }
    }

    fn theme(&self) -> Self::Theme {
        Theme::Dark
    }

    fn subscription(&self) -> Subscription<Self::Message> {
        iced::subscription::unfold(
            "store-events",
            self.store.subscribe(),
            |mut events| async move {
                loop {
                    match events.recv().await {
                        Ok(event) => return (AppMessage::StoreChanged(event), events),
                        Err(RecvError::Lagged(missed)) => {
                            warn!("Missed {} store events, reloading", missed);
                            return (AppMessage::Resync, events);
                        }
                        Err(RecvError::Closed) => futures::future::pending::<()>().await,
                    }
                }
            },
        )
    }

    fn update(&mut self, message: Self::Message) -> iced::Command<Self::Message> {
        match message {
            AppMessage::ChangePage(page) => {
                self.page = page;
                self.detail = None;
            }
            AppMessage::BindersLoaded(kind, result) => match result {
                Ok(binders) => self.reconciler_mut(kind).set_binders(binders),
                Err(e) => error!("Error loading {}: {}", kind.segment(), e),
            },
            AppMessage::CreateBinder(kind) => {
                let remote = self.reconciler(kind).remote();
                let name = self.reconciler(kind).next_default_name();
                return Command::perform(
                    async move { remote.create_binder(name).await.map_err(|e| e.to_string()) },
                    move |res| AppMessage::BinderCreated(kind, res),
                );
            }
            AppMessage::BinderCreated(kind, result) => match result {
                Ok(binder) => {
                    self.rename_input = binder.name.clone();
                    self.reset_open_view();
                    self.reconciler_mut(kind).binder_created(binder);
                }
                Err(e) => error!("Error creating {}: {}", kind.segment(), e),
            },
            AppMessage::OpenBinder(kind, id) => match self.reconciler_mut(kind).begin_select(&id) {
                Ok(binder) => {
                    self.rename_input = binder.name;
                    self.reset_open_view();
                    return load_entries(self.reconciler(kind).remote(), id);
                }
                Err(e) => warn!("{}", e),
            },
            AppMessage::EntriesLoaded(kind, id, result) => match result {
                Ok(entries) => {
                    self.reconciler_mut(kind).finish_select(&id, entries);
                }
                Err(e) => error!("Error getting cards of {}: {}", id, e),
            },
            AppMessage::CloseBinder(kind) => {
                self.reconciler_mut(kind).close();
                self.reset_open_view();
            }
            AppMessage::EditRename(name) => self.rename_input = name,
            AppMessage::RenameBinder(kind, id) => {
                let name = self.rename_input.trim().to_owned();
                if name.is_empty() {
                    return Command::none();
                }
                self.reconciler_mut(kind).binder_renamed(&id, &name);
                let remote = self.reconciler(kind).remote();
                return Command::perform(
                    async move {
                        remote
                            .rename_binder(&id, &name)
                            .await
                            .map_err(|e| e.to_string())
                    },
                    |res| AppMessage::StoreWritten("rename", res),
                );
            }
            AppMessage::DeleteBinder(kind, id) => {
                self.reconciler_mut(kind).binder_deleted(&id);
                let remote = self.reconciler(kind).remote();
                return Command::perform(
                    async move { remote.delete_binder(&id).await.map_err(|e| e.to_string()) },
                    |res| AppMessage::StoreWritten("delete", res),
                );
            }
            AppMessage::ExportBinder(kind, id) => {
                let remote = self.reconciler(kind).remote();
                return Command::perform(
                    async move { remote.export(&id).await.map_err(|e| e.to_string()) },
                    AppMessage::Exported,
                );
            }
            AppMessage::Exported(result) => match result {
                Ok(file) => save_export(&file),
                Err(e) => error!("Error exporting: {}", e),
            },
            AppMessage::StoreWritten(action, result) => {
                if let Err(e) = result {
                    error!("Error during {}: {}", action, e);
                }
            }
            AppMessage::Search(query) => {
                let ticket = self.search.begin(query.clone());
                let catalog = self.catalog.clone();
                return Command::perform(
                    async move { catalog.search(&query).await.map_err(|e| e.to_string()) },
                    move |res| AppMessage::SearchFinished(ticket, res),
                );
            }
            AppMessage::SearchFinished(ticket, result) => {
                self.search.finish(ticket, result);
            }
            AppMessage::AddCard(card) => {
                let Some(kind) = self.page.kind() else {
                    return Command::none();
                };
                match self.reconciler_mut(kind).stage_add(&card, 1) {
                    Ok((binder_id, mutation)) => {
                        return push(self.reconciler(kind).remote(), binder_id, mutation)
                    }
                    Err(e) => warn!("{}", e),
                }
            }
            AppMessage::RemoveCard(card_id) => {
                let Some(kind) = self.page.kind() else {
                    return Command::none();
                };
                match self.reconciler_mut(kind).stage_remove(&card_id) {
                    Ok(Some((binder_id, mutation))) => {
                        return push(self.reconciler(kind).remote(), binder_id, mutation)
                    }
                    Ok(None) => {}
                    Err(e) => warn!("{}", e),
                }
            }
            AppMessage::Pushed(kind, card_id, result) => {
                self.reconciler(kind).confirm(&card_id, &result)
            }
            AppMessage::StoreChanged(event) => {
                self.decks.apply_event(&event);
                self.binders.apply_event(&event);
            }
            AppMessage::Resync => {
                let mut commands = vec![
                    load_binders(self.decks.remote()),
                    load_binders(self.binders.remote()),
                ];
                for reconciler in [&self.decks, &self.binders] {
                    if let Some(binder) = reconciler.selected() {
                        commands.push(load_entries(reconciler.remote(), binder.id.clone()));
                    }
                }
                return Command::batch(commands);
            }
            AppMessage::ShowCard(detail) => {
                let downloads = detail
                    .images
                    .iter()
                    .filter(|&url| !self.image_cache.contains_key(url))
                    .map(|url| {
                        let catalog = self.catalog.clone();
                        let url = url.clone();
                        Command::perform(
                            async move {
                                let bytes = catalog.download_image(&url).await;
                                if let Err(e) = &bytes {
                                    warn!("Error downloading {}: {}", url, e);
                                }
                                (url, bytes.ok())
                            },
                            |res| AppMessage::UpdateImageCache(res.0, res.1),
                        )
                    })
                    .collect::<Vec<_>>();
                self.detail = Some(detail);
                return Command::batch(downloads);
            }
            AppMessage::CloseDetail => self.detail = None,
            AppMessage::UpdateImageCache(url, bytes) => {
                if let Some(b) = bytes {
                    self.image_cache.insert(url, b);
                }
            }
            AppMessage::EditImport(action) => self.import_content.perform(action),
            AppMessage::Import(kind) => {
                self.import_output = "Analyzing...".to_owned();
                let input = self.import_content.text();
                let catalog = self.catalog.clone();
                return Command::perform(
                    async move { decklist::resolve_decklist(&catalog, &input).await },
                    move |res| AppMessage::ImportResolved(kind, res.0, res.1),
                );
            }
            AppMessage::ImportResolved(kind, cards, errors) => {
                match decklist::stage(self.reconciler_mut(kind), cards, errors) {
                    Ok((report, mutations)) => {
                        self.import_output = report.summary();
                        self.import_content = text_editor::Content::new();
                        let remote = self.reconciler(kind).remote();
                        return Command::batch(mutations.into_iter().map(
                            |(binder_id, mutation)| push(remote.clone(), binder_id, mutation),
                        ));
                    }
                    Err(e) => {
                        warn!("{}", e);
                        self.import_output = e.to_string();
                    }
                }
            }
            AppMessage::AdjustLife(seat, counter, delta) => self.life.adjust(seat, counter, delta),
            AppMessage::ResetLife => self.life.reset(),
        };

        iced::Command::none()
    }

    fn view(&self) -> iced::Element<'_, Self::Message, Self::Theme, iced::Renderer> {
        let btn_decks = widget::button("Decks")
            .width(Length::Fixed(100.))
            .on_press(AppMessage::ChangePage(Page::Decks));
        let btn_binders = widget::button("Binders")
            .width(Length::Fixed(100.))
            .on_press(AppMessage::ChangePage(Page::Binders));
        let btn_life = widget::button("Life")
            .width(Length::Fixed(100.))
            .on_press(AppMessage::ChangePage(Page::LifeCounter));

        let list_btn = column!(btn_decks, btn_binders, btn_life);

        let content = match self.page.kind() {
            Some(kind) => {
                let reconciler = self.reconciler(kind);
                match reconciler.selected() {
                    Some(binder) => view_open_binder(self, reconciler, binder),
                    None => view_binder_list(reconciler),
                }
            }
            None => view_life_counter(&self.life),
        };

        let content = match &self.detail {
            Some(detail) => row!(content, view_card_detail(self, detail)).into(),
            None => content,
        };

        row!(list_btn, content).into()
    }
}

impl App {
    fn reconciler(&self, kind: BinderKind) -> &Reconciler {
        match kind {
            BinderKind::Deck => &self.decks,
            BinderKind::Collection => &self.binders,
        }
    }

    fn reconciler_mut(&mut self, kind: BinderKind) -> &mut Reconciler {
        match kind {
            BinderKind::Deck => &mut self.decks,
            BinderKind::Collection => &mut self.binders,
        }
    }

    fn reset_open_view(&mut self) {
        self.search = SearchState::default();
        self.detail = None;
        self.import_output.clear();
    }
}

fn load_binders(remote: Remote) -> Command<AppMessage> {
    let kind = remote.kind();
    Command::perform(
        async move { remote.list_binders().await.map_err(|e| e.to_string()) },
        move |res| AppMessage::BindersLoaded(kind, res),
    )
}

fn load_entries(remote: Remote, binder_id: String) -> Command<AppMessage> {
    let kind = remote.kind();
    let loading = binder_id.clone();
    Command::perform(
        async move {
            remote
                .load_entries(&loading)
                .await
                .map_err(|e| e.to_string())
        },
        move |res| AppMessage::EntriesLoaded(kind, binder_id, res),
    )
}

fn push(remote: Remote, binder_id: String, mutation: Mutation) -> Command<AppMessage> {
    let kind = remote.kind();
    let card_id = mutation.card_id().to_owned();
    Command::perform(
        async move {
            remote
                .push(&binder_id, mutation)
                .await
                .map_err(|e| e.to_string())
        },
        move |res| AppMessage::Pushed(kind, card_id, res),
    )
}

fn save_export(file: &ExportFile) {
    let path = match FileDialog::new()
        .set_filename(&file.file_name)
        .add_filter("Text", &["txt"])
        .show_save_single_file()
    {
        Ok(Some(path)) => path,
        Ok(None) => return,
        Err(e) => {
            error!("Error opening save dialog: {}", e);
            return;
        }
    };

    match fs::write(&path, &file.contents) {
        Ok(()) => info!("Exported to {}", path.display()),
        Err(e) => error!("Error writing {}: {}", path.display(), e),
    }
}

fn view_binder_list(reconciler: &Reconciler) -> AppElement {
    let kind = reconciler.kind();
    let title = match kind {
        BinderKind::Deck => "Decks",
        BinderKind::Collection => "Binders",
    };
    let btn_new = widget::button(match kind {
        BinderKind::Deck => "New Deck",
        BinderKind::Collection => "New Binder",
    })
    .on_press(AppMessage::CreateBinder(kind));

    let col_binders = widget::column(
        reconciler
            .binders()
            .iter()
            .map(view_binder_general),
    );

    column!(widget::text(title).size(28), btn_new, widget::scrollable(col_binders)).into()
}

fn view_binder_general(binder: &Binder) -> AppElement {
    let txt_name = widget::text(&binder.name).width(Length::Fill);
    let btn_edit =
        widget::button("Edit").on_press(AppMessage::OpenBinder(binder.kind, binder.id.clone()));
    let btn_delete =
        widget::button("Delete").on_press(AppMessage::DeleteBinder(binder.kind, binder.id.clone()));
    let btn_export =
        widget::button("Export").on_press(AppMessage::ExportBinder(binder.kind, binder.id.clone()));

    row!(txt_name, btn_edit, btn_delete, btn_export).into()
}

fn view_open_binder<'a>(
    app: &'a App,
    reconciler: &'a Reconciler,
    binder: &'a Binder,
) -> AppElement<'a> {
    let kind = binder.kind;
    let counts = reconciler.counts();

    let btn_back = widget::button("Back").on_press(AppMessage::CloseBinder(kind));
    let txt_title = widget::text(format!("{} ({} cards)", binder.name, counts.total()))
        .size(24)
        .width(Length::Fill);
    let field_name =
        widget::text_input("Name", &app.rename_input).on_input(AppMessage::EditRename);
    let btn_rename =
        widget::button("Rename").on_press(AppMessage::RenameBinder(kind, binder.id.clone()));
    let btn_export =
        widget::button("Export").on_press(AppMessage::ExportBinder(kind, binder.id.clone()));
    let header = row!(btn_back, txt_title, field_name, btn_rename, btn_export);

    let entries = widget::scrollable(widget::column(
        counts
            .iter()
            .map(|(card_id, entry)| view_card_entry(card_id, entry)),
    ))
    .width(Length::FillPortion(1));

    let search_box =
        widget::text_input("Search for cards...", &app.search.query).on_input(AppMessage::Search);
    let results = widget::scrollable(widget::column(
        app.search
            .results
            .iter()
            .map(|card| view_search_result(card, counts.count(&card.id))),
    ));

    let import_input = widget::text_editor(&app.import_content)
        .on_action(AppMessage::EditImport)
        .height(120);
    let btn_import = widget::button("Import list").on_press(AppMessage::Import(kind));
    let import_output = widget::text(&app.import_output);

    let side = column!(search_box, results, import_input, btn_import, import_output)
        .width(Length::FillPortion(1));

    column!(header, row!(entries, side)).into()
}

fn view_card_entry<'a>(card_id: &'a str, entry: &'a CardEntry) -> AppElement<'a> {
    let txt_count = widget::text(format!("{}x", entry.count)).width(Length::Fixed(50.));
    let btn_name = widget::button(widget::text(&entry.name))
        .style(iced::theme::Button::Text)
        .width(Length::Fill)
        .on_press(AppMessage::ShowCard(CardDetail {
            name: entry.name.clone(),
            images: entry.image_uris.clone(),
        }));
    let btn_add = widget::button("+").on_press(AppMessage::AddCard(Card {
        id: card_id.to_owned(),
        name: entry.name.clone(),
        type_line: entry.type_line.clone(),
        mana_cost: entry.mana_cost.clone(),
        img: entry.image_uris.first().cloned(),
        faces: Vec::new(),
    }));
    let btn_remove = widget::button("-").on_press(AppMessage::RemoveCard(card_id.to_owned()));

    row!(txt_count, btn_name, btn_add, btn_remove).into()
}

fn view_search_result(card: &Card, in_binder: u32) -> AppElement {
    let btn_name = widget::button(widget::text(format!("{} {}", card.name, card.mana_cost)))
        .style(iced::theme::Button::Text)
        .width(Length::Fill)
        .on_press(AppMessage::ShowCard(CardDetail {
            name: card.name.clone(),
            images: card.images(),
        }));
    let txt_owned = widget::text(if in_binder > 0 {
        format!("{}x", in_binder)
    } else {
        String::new()
    });
    let btn_add = widget::button("Add").on_press(AppMessage::AddCard(card.clone()));

    row!(btn_name, txt_owned, btn_add).into()
}

fn view_card_detail<'a>(app: &'a App, detail: &'a CardDetail) -> AppElement<'a> {
    let images = widget::row(detail.images.iter().map(|url| -> AppElement<'a> {
        match app.image_cache.get(url) {
            Some(bytes) => widget::image::<Handle>(Handle::from_memory(bytes.clone()))
                .content_fit(iced::ContentFit::ScaleDown)
                .height(400)
                .into(),
            None => widget::text("Loading...").into(),
        }
    }));
    let btn_close = widget::button("Close").on_press(AppMessage::CloseDetail);

    column!(widget::text(&detail.name).size(20), images, btn_close)
        .width(Length::FillPortion(1))
        .into()
}

fn view_life_counter(life: &LifeCounter) -> AppElement {
    let seats = widget::row(
        life.players()
            .iter()
            .enumerate()
            .map(|(seat, player)| view_player(seat, player)),
    );

    column!(seats, widget::button("Reset").on_press(AppMessage::ResetLife)).into()
}

fn view_player(seat: usize, player: &Player) -> AppElement {
    let status = if player.is_eliminated() { "Eliminated" } else { "" };

    column!(
        widget::text(&player.name).size(20),
        widget::text(player.life).size(48),
        view_counter(seat, "Life", Counter::Life, player.life.to_string()),
        view_counter(
            seat,
            "Commander Damage:",
            Counter::CommanderDamage,
            player.commander_damage.to_string()
        ),
        view_counter(seat, "Poison Counters:", Counter::Poison, player.poison.to_string()),
        widget::text(status),
    )
    .width(Length::FillPortion(1))
    .into()
}

fn view_counter(
    seat: usize,
    label: &'static str,
    counter: Counter,
    value: String,
) -> AppElement<'static> {
    row!(
        widget::text(label).width(Length::Fixed(170.)),
        widget::button("-").on_press(AppMessage::AdjustLife(seat, counter, -1)),
        widget::text(value).width(Length::Fixed(40.)),
        widget::button("+").on_press(AppMessage::AdjustLife(seat, counter, 1)),
    )
    .into()
}
